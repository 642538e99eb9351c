//! Escalation timers for unacknowledged critical incidents.
//!
//! One timer per device. Lifecycle:
//!
//! ```text
//! ARMED -> ACKNOWLEDGED -> CLOSED
//!   |  \-> FIRED ------^
//!   \----> CLOSED
//! ```
//!
//! Every transition happens under the scheduler mutex and is audited before
//! it is applied, so an acknowledgement and a firing for the same incident
//! can never both succeed. The sleeping task itself lives in the engine; it
//! carries the `version` it was armed with and must win `begin_fire` before
//! posting anything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::AbortHandle;

use crate::audit::{AuditEntry, AuditLedger, EntityType};
use crate::error::EngineError;
use crate::types::{EscalationState, EscalationTimer};

#[derive(Debug, Clone, PartialEq)]
pub enum ArmResult {
  /// New timer; the caller must start the sleeping task.
  Armed(EscalationTimer),
  /// A timer for this incident is already pending.
  AlreadyArmed(EscalationTimer),
}

#[derive(Debug)]
struct Slot {
  timer: EscalationTimer,
  task: Option<AbortHandle>,
}

pub struct EscalationScheduler {
  slots: Mutex<HashMap<String, Slot>>,
  version: AtomicU64,
  audit: Arc<AuditLedger>,
  actor: String,
}

impl EscalationScheduler {
  pub fn new(audit: Arc<AuditLedger>, actor: impl Into<String>) -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
      version: AtomicU64::new(0),
      audit,
      actor: actor.into(),
    }
  }

  /// Arm a timer for `incident_id`. Idempotent while the same incident is
  /// armed; a pending timer for an older incident is superseded.
  pub fn arm(
    &self,
    event_id: &str,
    device_id: &str,
    incident_id: &str,
    now: DateTime<Utc>,
    delay: Duration,
  ) -> Result<ArmResult, EngineError> {
    let fire_at = chrono::Duration::from_std(delay)
      .ok()
      .and_then(|d| now.checked_add_signed(d))
      .ok_or_else(|| EngineError::config(format!("escalation delay out of range: {:?}", delay)))?;
    let mut slots = self.lock();

    if let Some(slot) = slots.get_mut(device_id) {
      if slot.timer.state == EscalationState::Armed {
        if slot.timer.incident_id == incident_id {
          return Ok(ArmResult::AlreadyArmed(slot.timer.clone()));
        }
        let mut closed = slot.timer.clone();
        closed.state = EscalationState::Closed;
        closed.cancelled = true;
        self.record(event_id, &self.actor, &slot.timer, &closed, Some("superseded"))?;
        if let Some(task) = slot.task.take() {
          task.abort();
        }
        slot.timer = closed;
      }
    }

    let timer = EscalationTimer {
      device_id: device_id.to_string(),
      incident_id: incident_id.to_string(),
      armed_at: now,
      fire_at,
      cancelled: false,
      state: EscalationState::Armed,
      version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
    };
    self.audit.append(
      AuditEntry::new(event_id, EntityType::Escalation, incident_id, EscalationState::Armed.as_str())
        .by(&self.actor)
        .after(json!(timer)),
    )?;
    slots.insert(
      device_id.to_string(),
      Slot {
        timer: timer.clone(),
        task: None,
      },
    );
    tracing::info!(
      device_id,
      incident_id,
      version = timer.version,
      fire_at = %timer.fire_at,
      "escalation armed"
    );
    Ok(ArmResult::Armed(timer))
  }

  /// Remember the sleeping task so cancellation can abort it. Ignored when
  /// the timer has already moved on.
  pub fn attach_task(&self, device_id: &str, version: u64, task: AbortHandle) {
    let mut slots = self.lock();
    if let Some(slot) = slots.get_mut(device_id) {
      if slot.timer.version == version && slot.timer.state == EscalationState::Armed {
        slot.task = Some(task);
      }
    }
  }

  /// ARMED -> ACKNOWLEDGED. Returns `None` when nothing was armed.
  pub fn acknowledge(
    &self,
    event_id: &str,
    device_id: &str,
    actor: &str,
  ) -> Result<Option<EscalationTimer>, EngineError> {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(device_id) else {
      return Ok(None);
    };
    if slot.timer.state != EscalationState::Armed {
      return Ok(None);
    }

    let mut next = slot.timer.clone();
    next.state = EscalationState::Acknowledged;
    next.cancelled = true;
    self.record(event_id, actor, &slot.timer, &next, None)?;
    if let Some(task) = slot.task.take() {
      task.abort();
    }
    slot.timer = next.clone();
    tracing::info!(device_id, incident_id = %next.incident_id, actor, "escalation acknowledged");
    Ok(Some(next))
  }

  /// Any live state -> CLOSED. Returns `None` when already closed or absent.
  pub fn close(
    &self,
    event_id: &str,
    device_id: &str,
    actor: &str,
  ) -> Result<Option<EscalationTimer>, EngineError> {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(device_id) else {
      return Ok(None);
    };
    if slot.timer.state == EscalationState::Closed {
      return Ok(None);
    }

    let mut next = slot.timer.clone();
    next.cancelled = next.cancelled || next.state == EscalationState::Armed;
    next.state = EscalationState::Closed;
    self.record(event_id, actor, &slot.timer, &next, None)?;
    if let Some(task) = slot.task.take() {
      task.abort();
    }
    slot.timer = next.clone();
    Ok(Some(next))
  }

  /// ARMED -> FIRED, only for the version the task was armed with. Exactly
  /// one caller can win this for a given timer.
  pub fn begin_fire(&self, device_id: &str, version: u64) -> Result<Option<EscalationTimer>, EngineError> {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(device_id) else {
      return Ok(None);
    };
    if slot.timer.version != version || slot.timer.state != EscalationState::Armed {
      tracing::debug!(device_id, version, state = slot.timer.state.as_str(), "stale escalation timer ignored");
      return Ok(None);
    }

    let mut next = slot.timer.clone();
    next.state = EscalationState::Fired;
    let event_id = format!("escalation:{}", version);
    self.record(&event_id, &self.actor, &slot.timer, &next, None)?;
    // The firing task is the caller; dropping the handle does not abort it.
    slot.task = None;
    slot.timer = next.clone();
    tracing::warn!(device_id, incident_id = %next.incident_id, version, "escalation fired");
    Ok(Some(next))
  }

  pub fn get(&self, device_id: &str) -> Option<EscalationTimer> {
    self.lock().get(device_id).map(|s| s.timer.clone())
  }

  pub fn armed_count(&self) -> usize {
    self
      .lock()
      .values()
      .filter(|s| s.timer.state == EscalationState::Armed)
      .count()
  }

  fn record(
    &self,
    event_id: &str,
    actor: &str,
    before: &EscalationTimer,
    after: &EscalationTimer,
    reason: Option<&str>,
  ) -> Result<(), EngineError> {
    let mut state = json!(after);
    if let (Some(r), Some(obj)) = (reason, state.as_object_mut()) {
      obj.insert("reason".into(), json!(r));
    }
    self.audit.append(
      AuditEntry::new(event_id, EntityType::Escalation, &after.incident_id, after.state.as_str())
        .by(actor)
        .before(json!(before))
        .after(state),
    )?;
    Ok(())
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
    self.slots.lock().unwrap_or_else(|p| p.into_inner())
  }
}
