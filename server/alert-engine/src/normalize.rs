//! Normalize raw device events into canonical IncidentEvent models.
//!
//! Validation is pure. Replay admission (`replayId` strictly increasing per
//! device) is stateful and must run under the device's lock.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::types::*;

/// Parse and validate a RawEvent into a canonical IncidentEvent.
pub fn validate(raw: &RawEvent) -> Result<IncidentEvent, EngineError> {
  let device_id = canonical_device_id(&raw.device_id);
  if device_id.is_empty() {
    return Err(EngineError::validation("deviceId", "must not be empty"));
  }

  let observed_at: DateTime<Utc> = DateTime::parse_from_rfc3339(raw.timestamp.trim())
    .map_err(|e| EngineError::validation("timestamp", &format!("invalid RFC3339: {}", e)))?
    .with_timezone(&Utc);

  let p = raw.failure_probability;
  if !p.is_finite() || !(0.0..=1.0).contains(&p) {
    return Err(EngineError::validation(
      "failureProbability",
      &format!("must be within [0, 1], got {}", p),
    ));
  }

  let sensor_type = SensorType::from_str_loose(&raw.sensor_type).ok_or_else(|| {
    EngineError::validation(
      "sensorType",
      "expected temperature|vibration|pressure|rpm|power",
    )
  })?;

  // Sources that ship the payload as an embedded JSON string get it decoded.
  let payload = match &raw.payload {
    serde_json::Value::String(s) => {
      serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
    }
    other => other.clone(),
  };

  Ok(IncidentEvent {
    device_id,
    observed_at,
    failure_probability: p,
    sensor_type,
    payload,
    replay_id: raw.replay_id,
  })
}

/// Canonical device id: trimmed, upper-case.
pub fn canonical_device_id(raw: &str) -> String {
  raw.trim().to_ascii_uppercase()
}

/// Tracks the highest admitted replayId per device.
#[derive(Debug, Default)]
pub struct Normalizer {
  last_seen: Mutex<HashMap<String, u64>>,
}

impl Normalizer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Validate and admit in one step.
  pub fn normalize(&self, raw: &RawEvent) -> Result<IncidentEvent, EngineError> {
    let event = validate(raw)?;
    self.admit(&event)?;
    Ok(event)
  }

  /// Reject events whose replayId is not above the last admitted one for the
  /// device; otherwise advance the watermark.
  pub fn admit(&self, event: &IncidentEvent) -> Result<(), EngineError> {
    let mut last_seen = self.last_seen.lock().unwrap_or_else(|p| p.into_inner());
    match last_seen.get(&event.device_id) {
      Some(&last) if event.replay_id <= last => Err(EngineError::StaleEvent {
        device_id: event.device_id.clone(),
        replay_id: event.replay_id,
        last_seen: last,
      }),
      _ => {
        last_seen.insert(event.device_id.clone(), event.replay_id);
        Ok(())
      }
    }
  }

  pub fn last_seen(&self, device_id: &str) -> Option<u64> {
    let last_seen = self.last_seen.lock().unwrap_or_else(|p| p.into_inner());
    last_seen.get(device_id).copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(device: &str, p: f64, replay_id: u64) -> RawEvent {
    RawEvent {
      device_id: device.into(),
      timestamp: "2026-01-01T08:00:00Z".into(),
      sensor_type: "Temperature".into(),
      failure_probability: p,
      payload: serde_json::Value::String(r#"{"temp":105,"vib":0.12}"#.into()),
      replay_id,
    }
  }

  #[test]
  fn normalize_valid_event() {
    let event = validate(&raw(" eq-001-acme ", 0.92, 1001)).unwrap();
    assert_eq!(event.device_id, "EQ-001-ACME");
    assert_eq!(event.sensor_type, SensorType::Temperature);
    assert_eq!(event.payload["temp"], 105);
  }

  #[test]
  fn rejects_empty_device() {
    let err = validate(&raw("  ", 0.5, 1)).unwrap_err();
    assert!(err.to_string().contains("deviceId"));
  }

  #[test]
  fn rejects_out_of_range_probability() {
    assert!(validate(&raw("EQ-1", 1.01, 1)).is_err());
    assert!(validate(&raw("EQ-1", -0.1, 1)).is_err());
    assert!(validate(&raw("EQ-1", f64::NAN, 1)).is_err());
    assert!(validate(&raw("EQ-1", 1.0, 1)).is_ok());
    assert!(validate(&raw("EQ-1", 0.0, 1)).is_ok());
  }

  #[test]
  fn rejects_unknown_sensor() {
    let mut r = raw("EQ-1", 0.5, 1);
    r.sensor_type = "humidity".into();
    let err = validate(&r).unwrap_err();
    assert!(err.to_string().contains("sensorType"));
  }

  #[test]
  fn replay_must_strictly_increase_per_device() {
    let normalizer = Normalizer::new();
    normalizer.normalize(&raw("EQ-1", 0.9, 1001)).unwrap();
    let dup = normalizer.normalize(&raw("EQ-1", 0.9, 1001)).unwrap_err();
    assert!(matches!(dup, EngineError::StaleEvent { last_seen: 1001, .. }));
    let older = normalizer.normalize(&raw("EQ-1", 0.9, 999)).unwrap_err();
    assert!(matches!(older, EngineError::StaleEvent { .. }));
    // Independent watermark per device.
    normalizer.normalize(&raw("EQ-2", 0.9, 5)).unwrap();
    normalizer.normalize(&raw("EQ-1", 0.9, 1006)).unwrap();
    assert_eq!(normalizer.last_seen("EQ-1"), Some(1006));
  }

  #[test]
  fn rejected_validation_does_not_advance_watermark() {
    let normalizer = Normalizer::new();
    assert!(normalizer.normalize(&raw("EQ-1", 2.0, 10)).is_err());
    assert_eq!(normalizer.last_seen("EQ-1"), None);
    normalizer.normalize(&raw("EQ-1", 0.2, 10)).unwrap();
  }
}
