/// Small xorshift generator for roster shuffles. Seedable so a desk started
/// with a fixed seed draws the same heats every time.
#[derive(Clone, Debug)]
pub struct DeskRng {
  state: u64,
}

impl DeskRng {
  pub fn new(seed: u64) -> Self {
    let mut state = seed;
    if state == 0 {
      state = 0x9E37_79B9_7F4A_7C15;
    }
    DeskRng { state }
  }

  pub fn from_clock() -> Self {
    DeskRng::new(crate::config::now_ms())
  }

  pub fn next_u64(&mut self) -> u64 {
    let mut x = self.state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    self.state = x;
    x
  }

  /// Uniform index in `0..=max_inclusive`.
  fn gen_index(&mut self, max_inclusive: usize) -> usize {
    if max_inclusive == 0 {
      return 0;
    }
    let span = max_inclusive as u64 + 1;
    (self.next_u64() % span) as usize
  }

  /// Fisher-Yates, in place.
  pub fn shuffle<T>(&mut self, items: &mut [T]) {
    for i in (1..items.len()).rev() {
      let j = self.gen_index(i);
      items.swap(i, j);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_same_seed_same_sequence() {
    let mut a = DeskRng::new(42);
    let mut b = DeskRng::new(42);
    for _ in 0..10 {
      assert_eq!(a.next_u64(), b.next_u64());
    }
  }

  #[test]
  fn test_zero_seed_is_remapped() {
    let mut rng = DeskRng::new(0);
    assert_ne!(rng.next_u64(), 0);
  }

  #[test]
  fn test_shuffle_is_permutation() {
    let mut rng = DeskRng::new(7);
    let mut items: Vec<u32> = (1..=20).collect();
    rng.shuffle(&mut items);
    let mut sorted = items.clone();
    sorted.sort();
    assert_eq!(sorted, (1..=20).collect::<Vec<_>>());
  }
}
