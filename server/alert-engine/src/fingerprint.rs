//! Stable incident identifiers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Compute the id of the `sequence`-th incident opened by a cooldown store.
///
/// Key components: canonical device id, full-precision opened-at timestamp and
/// the store's open sequence. Replaying the same stream into a fresh store
/// yields the same ids, and a close followed by a reopen at the same instant
/// still gets a new one.
pub fn incident_id(device_id: &str, opened_at: &DateTime<Utc>, sequence: u64) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(device_id.as_bytes());
  hasher.update(b"|");
  hasher.update(opened_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
  hasher.update(b"|");
  hasher.update(sequence.to_string().as_bytes());
  let hex = hasher.finalize().to_hex();
  format!("inc-{}", &hex[..16])
}
