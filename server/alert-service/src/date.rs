//! Date parsing utilities.

use chrono::{DateTime, NaiveDate, Utc};

/// Normalize a metrics bucket selector to YYYY-MM-DD (UTC). Accepts a bare
/// date or a full RFC 3339 timestamp.
pub fn parse_bucket_date(s: &str) -> Option<String> {
  let s = s.trim();
  if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return Some(d.format("%Y-%m-%d").to_string());
  }
  let dt = DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc);
  Some(dt.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_dates_and_timestamps() {
    assert_eq!(parse_bucket_date("2026-01-09").as_deref(), Some("2026-01-09"));
    assert_eq!(
      parse_bucket_date("2026-01-09T23:30:00-02:00").as_deref(),
      Some("2026-01-10")
    );
    assert!(parse_bucket_date("yesterday").is_none());
    assert!(parse_bucket_date("2026-02-30").is_none());
  }
}
