use crate::error::{DeskError, Result};

/// Split `count` entrants into heat sizes of 4 and 3, as many 4s as possible.
/// Sizes are returned 4s first so callers can slice an ordered roster in place.
pub fn split_3_or_4(count: usize) -> Result<Vec<usize>> {
  if count < 3 {
    return Err(DeskError::InvalidGroupCount(count));
  }
  for fours in (0..=count / 4).rev() {
    let rest = count - fours * 4;
    if rest % 3 == 0 {
      let mut sizes = vec![4; fours];
      sizes.extend(std::iter::repeat(3).take(rest / 3));
      return Ok(sizes);
    }
  }
  Err(DeskError::UngroupableCount(count))
}

/// Heat sizes for a bracket cohort. Never fails: too few entrants means no heat,
/// and four or fewer race together.
pub fn knockout_heat_sizes(count: usize) -> Vec<usize> {
  if count < 3 {
    return Vec::new();
  }
  if count <= 4 {
    return vec![count];
  }
  split_3_or_4(count).unwrap_or_default()
}

/// Slice `items` into consecutive chunks of the given sizes.
pub fn chunk_by_sizes<T: Clone>(items: &[T], sizes: &[usize]) -> Vec<Vec<T>> {
  let mut out = Vec::with_capacity(sizes.len());
  let mut cursor = 0usize;
  for size in sizes {
    let end = (cursor + size).min(items.len());
    out.push(items[cursor..end].to_vec());
    cursor = end;
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_split_prefers_fours() {
    assert_eq!(split_3_or_4(3).unwrap(), vec![3]);
    assert_eq!(split_3_or_4(4).unwrap(), vec![4]);
    assert_eq!(split_3_or_4(7).unwrap(), vec![4, 3]);
    assert_eq!(split_3_or_4(10).unwrap(), vec![4, 3, 3]);
    assert_eq!(split_3_or_4(16).unwrap(), vec![4, 4, 4, 4]);
    assert_eq!(split_3_or_4(13).unwrap(), vec![4, 3, 3, 3]);
  }

  #[test]
  fn test_split_rejects_small_counts() {
    assert!(matches!(split_3_or_4(0), Err(DeskError::InvalidGroupCount(0))));
    assert!(matches!(split_3_or_4(2), Err(DeskError::InvalidGroupCount(2))));
  }

  #[test]
  fn test_five_is_ungroupable() {
    assert!(matches!(split_3_or_4(5), Err(DeskError::UngroupableCount(5))));
  }

  #[test]
  fn test_split_covers_every_other_count() {
    for n in (3..200usize).filter(|n| *n != 5) {
      let sizes = split_3_or_4(n).unwrap();
      assert_eq!(sizes.iter().sum::<usize>(), n);
      assert!(sizes.iter().all(|s| *s == 3 || *s == 4));
      assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }
  }

  #[test]
  fn test_knockout_sizes() {
    assert!(knockout_heat_sizes(2).is_empty());
    assert_eq!(knockout_heat_sizes(3), vec![3]);
    assert_eq!(knockout_heat_sizes(4), vec![4]);
    assert!(knockout_heat_sizes(5).is_empty());
    assert_eq!(knockout_heat_sizes(6), vec![3, 3]);
    assert_eq!(knockout_heat_sizes(8), vec![4, 4]);
  }

  #[test]
  fn test_chunk_by_sizes() {
    let ids = vec![1, 2, 3, 4, 5, 6, 7];
    assert_eq!(chunk_by_sizes(&ids, &[4, 3]), vec![vec![1, 2, 3, 4], vec![5, 6, 7]]);
  }
}
