//! Classify events against the cooldown store: new alert, thread update,
//! silently absorbed, or below threshold.
//!
//! Callers hold the device lock across `classify` so the lookup/open/refresh
//! sequence is atomic per device.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RoutingTable;
use crate::cooldown::CooldownStore;
use crate::error::EngineError;
use crate::types::{DedupeDecision, DedupeOutcome, IncidentEvent};

pub struct Deduplicator {
  cooldowns: Arc<CooldownStore>,
  routing: Arc<RoutingTable>,
  default_threshold: f64,
  window: Duration,
}

impl Deduplicator {
  pub fn new(
    cooldowns: Arc<CooldownStore>,
    routing: Arc<RoutingTable>,
    default_threshold: f64,
    window: Duration,
  ) -> Self {
    Self {
      cooldowns,
      routing,
      default_threshold,
      window,
    }
  }

  /// Alert threshold for a device (policy override or default), inclusive.
  pub fn threshold(&self, device_id: &str) -> f64 {
    self
      .routing
      .policy(device_id)
      .alert_threshold
      .unwrap_or(self.default_threshold)
  }

  pub fn classify(&self, event: &IncidentEvent) -> Result<DedupeDecision, EngineError> {
    let event_id = event.replay_id.to_string();
    let now = event.observed_at;

    let decision = match self.cooldowns.lookup(&event.device_id, now)? {
      None if event.failure_probability < self.threshold(&event.device_id) => DedupeDecision {
        event_replay_id: event.replay_id,
        device_id: event.device_id.clone(),
        outcome: DedupeOutcome::BelowThreshold,
        incident_id: None,
        thread_handle: None,
        hit_count: 0,
      },
      None => {
        let entry = self
          .cooldowns
          .open(&event_id, &event.device_id, now, self.window)?;
        DedupeDecision {
          event_replay_id: event.replay_id,
          device_id: event.device_id.clone(),
          outcome: DedupeOutcome::NewAlert,
          incident_id: Some(entry.incident_id),
          thread_handle: None,
          hit_count: entry.hit_count,
        }
      }
      Some(_) => {
        let entry = self
          .cooldowns
          .refresh(&event_id, &event.device_id, now, self.window)?;
        // No thread yet (creation in flight or failed): absorb silently.
        let outcome = if entry.thread_handle.is_some() {
          DedupeOutcome::ThreadUpdate
        } else {
          DedupeOutcome::CooldownActive
        };
        DedupeDecision {
          event_replay_id: event.replay_id,
          device_id: event.device_id.clone(),
          outcome,
          incident_id: Some(entry.incident_id),
          thread_handle: entry.thread_handle,
          hit_count: entry.hit_count,
        }
      }
    };

    tracing::debug!(
      device_id = %decision.device_id,
      replay_id = decision.event_replay_id,
      outcome = ?decision.outcome,
      hit_count = decision.hit_count,
      "dedupe decision"
    );
    Ok(decision)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::audit::AuditLedger;
  use crate::config::Config;
  use crate::types::{SensorType, ThreadHandle};
  use chrono::{DateTime, TimeZone, Utc};

  fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
  }

  fn event(device: &str, p: f64, replay_id: u64, secs: i64) -> IncidentEvent {
    IncidentEvent {
      device_id: device.into(),
      observed_at: at(secs),
      failure_probability: p,
      sensor_type: SensorType::Temperature,
      payload: serde_json::Value::Null,
      replay_id,
    }
  }

  fn dedup(routing_json: &str) -> (Deduplicator, Arc<CooldownStore>) {
    let config = Config::default();
    let audit = Arc::new(AuditLedger::new());
    let store = Arc::new(CooldownStore::new(audit, "test"));
    let routing = Arc::new(RoutingTable::from_json_str(routing_json, &config).unwrap());
    (
      Deduplicator::new(store.clone(), routing, config.alert_threshold, config.cooldown),
      store,
    )
  }

  #[test]
  fn below_threshold_is_suppressed() {
    let (d, store) = dedup("[]");
    let decision = d.classify(&event("EQ-9", 0.3, 2001, 0)).unwrap();
    assert_eq!(decision.outcome, DedupeOutcome::BelowThreshold);
    assert!(store.lookup("EQ-9", at(0)).unwrap().is_none());
  }

  #[test]
  fn threshold_is_inclusive() {
    let (d, _) = dedup("[]");
    let decision = d.classify(&event("EQ-1", 0.5, 1, 0)).unwrap();
    assert_eq!(decision.outcome, DedupeOutcome::NewAlert);
  }

  #[test]
  fn device_threshold_override() {
    let (d, _) = dedup(
      r##"[{"deviceId": "EQ-4", "channel": "#l1", "priority": "high", "escalationDelayMinutes": 30, "alertThreshold": 0.7}]"##,
    );
    assert_eq!(d.threshold("EQ-4"), 0.7);
    let decision = d.classify(&event("EQ-4", 0.65, 1, 0)).unwrap();
    assert_eq!(decision.outcome, DedupeOutcome::BelowThreshold);
  }

  #[test]
  fn n_events_in_window_yield_one_new_alert() {
    let (d, store) = dedup("[]");
    let first = d.classify(&event("EQ-1", 0.92, 1, 0)).unwrap();
    assert_eq!(first.outcome, DedupeOutcome::NewAlert);
    store
      .attach_thread("1", "EQ-1", first.incident_id.as_deref().unwrap(), ThreadHandle("t-1".into()))
      .unwrap();

    for i in 1..5u64 {
      let decision = d.classify(&event("EQ-1", 0.9, 1 + i, 30 * i as i64)).unwrap();
      assert_eq!(decision.outcome, DedupeOutcome::ThreadUpdate);
      assert_eq!(decision.thread_handle, Some(ThreadHandle("t-1".into())));
      assert_eq!(decision.hit_count, 1 + i as u32);
      assert_eq!(decision.incident_id, first.incident_id);
    }
  }

  #[test]
  fn existing_entry_without_thread_is_absorbed() {
    let (d, _) = dedup("[]");
    d.classify(&event("EQ-1", 0.92, 1, 0)).unwrap();
    let decision = d.classify(&event("EQ-1", 0.94, 2, 45)).unwrap();
    assert_eq!(decision.outcome, DedupeOutcome::CooldownActive);
    assert!(decision.was_deduplicated());
  }

  #[test]
  fn low_probability_still_folds_into_open_incident() {
    let (d, _) = dedup("[]");
    d.classify(&event("EQ-1", 0.92, 1, 0)).unwrap();
    let decision = d.classify(&event("EQ-1", 0.2, 2, 10)).unwrap();
    assert_eq!(decision.outcome, DedupeOutcome::CooldownActive);
    assert_eq!(decision.hit_count, 2);
  }

  #[test]
  fn after_window_a_new_incident_opens() {
    let (d, _) = dedup("[]");
    let first = d.classify(&event("EQ-1", 0.92, 1, 0)).unwrap();
    let later = d.classify(&event("EQ-1", 0.92, 2, 600)).unwrap();
    assert_eq!(later.outcome, DedupeOutcome::NewAlert);
    assert_ne!(first.incident_id, later.incident_id);
  }
}
