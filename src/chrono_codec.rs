use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static CHRONO_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// `hh:mm:ss:cc` or `mm:ss:cc`, one or two digits per segment.
fn chrono_pattern() -> Option<&'static Regex> {
  CHRONO_PATTERN
    .get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?$").ok())
    .as_ref()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedChrono {
  pub time_ms: Option<u64>,
  pub time_text: Option<String>,
}

/// Parse a race time. Never fails: text that does not match is kept as typed
/// with no millisecond value, and blank input yields nothing at all.
pub fn parse_chrono(raw: &str) -> ParsedChrono {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return ParsedChrono::default();
  }
  let unparsed = || ParsedChrono {
    time_ms: None,
    time_text: Some(trimmed.to_string()),
  };
  let Some(caps) = chrono_pattern().and_then(|re| re.captures(trimmed)) else {
    return unparsed();
  };
  let segment = |idx: usize| -> u64 {
    caps
      .get(idx)
      .and_then(|m| m.as_str().parse::<u64>().ok())
      .unwrap_or(0)
  };
  let (hh, mm, ss, cc) = if caps.get(4).is_some() {
    (segment(1), segment(2), segment(3), segment(4))
  } else {
    (0, segment(1), segment(2), segment(3))
  };
  ParsedChrono {
    time_ms: Some((hh * 3600 + mm * 60 + ss) * 1000 + cc * 10),
    time_text: Some(format_parts(hh, mm, ss, cc)),
  }
}

/// Render milliseconds back to `HH:MM:SS:CC`.
pub fn format_chrono(ms: u64) -> String {
  let cc = (ms % 1000) / 10;
  let total_secs = ms / 1000;
  format_parts(total_secs / 3600, (total_secs / 60) % 60, total_secs % 60, cc)
}

fn format_parts(hh: u64, mm: u64, ss: u64, cc: u64) -> String {
  format!("{hh:02}:{mm:02}:{ss:02}:{cc:02}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_three_segments() {
    let parsed = parse_chrono("1:2:3");
    assert_eq!(parsed.time_ms, Some(62_030));
    assert_eq!(parsed.time_text.as_deref(), Some("00:01:02:03"));
  }

  #[test]
  fn test_parse_four_segments() {
    let parsed = parse_chrono(" 01:00:05:50 ");
    assert_eq!(parsed.time_ms, Some(3_605_500));
    assert_eq!(parsed.time_text.as_deref(), Some("01:00:05:50"));
  }

  #[test]
  fn test_unparsable_keeps_text() {
    let parsed = parse_chrono("1:2");
    assert_eq!(parsed.time_ms, None);
    assert_eq!(parsed.time_text.as_deref(), Some("1:2"));

    let parsed = parse_chrono("123:00:00");
    assert_eq!(parsed.time_ms, None);
    assert_eq!(parsed.time_text.as_deref(), Some("123:00:00"));
  }

  #[test]
  fn test_blank_is_empty() {
    assert_eq!(parse_chrono(""), ParsedChrono::default());
    assert_eq!(parse_chrono("   "), ParsedChrono::default());
  }

  #[test]
  fn test_format_round_trips_normalized_text() {
    let parsed = parse_chrono("12:34:56");
    assert_eq!(format_chrono(parsed.time_ms.unwrap()), "00:12:34:56");
  }
}
