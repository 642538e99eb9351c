//! Notification routing: new incident threads, in-thread replies and
//! escalation posts, each delivered with bounded exponential backoff.
//!
//! Exhausted deliveries are audited as FAILED and returned as
//! `EngineError::Delivery`; they are never dropped silently.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::audit::{AuditEntry, AuditLedger, EntityType};
use crate::collaborators::Messenger;
use crate::config::{Config, DevicePolicy, RoutingTable};
use crate::cooldown::CooldownStore;
use crate::error::{DeliveryError, EngineError};
use crate::types::*;

pub struct NotificationRouter {
  messenger: Arc<dyn Messenger>,
  routing: Arc<RoutingTable>,
  cooldowns: Arc<CooldownStore>,
  audit: Arc<AuditLedger>,
  max_attempts: u32,
  base_delay: Duration,
  critical_threshold: f64,
  actor: String,
}

impl NotificationRouter {
  pub fn new(
    messenger: Arc<dyn Messenger>,
    routing: Arc<RoutingTable>,
    cooldowns: Arc<CooldownStore>,
    audit: Arc<AuditLedger>,
    config: &Config,
  ) -> Self {
    Self {
      messenger,
      routing,
      cooldowns,
      audit,
      max_attempts: config.delivery_max_attempts.max(1),
      base_delay: config.delivery_base_delay,
      critical_threshold: config.critical_threshold,
      actor: config.actor.clone(),
    }
  }

  /// Route a classified event. Returns `Ok(None)` for outcomes that send
  /// nothing (absorbed or below threshold).
  pub async fn route(
    &self,
    decision: &DedupeDecision,
    event: &IncidentEvent,
  ) -> Result<Option<NotificationResult>, EngineError> {
    let policy = self.routing.policy(&decision.device_id);
    let event_id = decision.event_replay_id.to_string();

    match decision.outcome {
      DedupeOutcome::NewAlert => {
        let message = compose_alert(event, policy, self.critical_threshold);
        let channel = policy.channel.clone();
        let (handle, attempts) = self
          .deliver(&event_id, &decision.device_id, "create_thread", || {
            self.messenger.create_thread(&channel, &message)
          })
          .await?;

        if let Some(incident_id) = &decision.incident_id {
          self
            .cooldowns
            .attach_thread(&event_id, &decision.device_id, incident_id, handle.clone())?;
        }
        let result = NotificationResult {
          kind: NotificationKind::ThreadCreated,
          channel,
          thread_handle: handle,
          attempts,
        };
        self.record_sent(&event_id, decision, &result)?;
        tracing::info!(
          device_id = %decision.device_id,
          channel = %result.channel,
          thread = %result.thread_handle,
          "alert thread created"
        );
        Ok(Some(result))
      }
      DedupeOutcome::ThreadUpdate => {
        let handle = match &decision.thread_handle {
          Some(h) => h.clone(),
          None => return Ok(None),
        };
        let message = compose_update(event, decision.hit_count);
        let ((), attempts) = self
          .deliver(&event_id, &decision.device_id, "reply", || {
            self.messenger.reply(&handle, &message)
          })
          .await?;
        let result = NotificationResult {
          kind: NotificationKind::Reply,
          channel: policy.channel.clone(),
          thread_handle: handle,
          attempts,
        };
        self.record_sent(&event_id, decision, &result)?;
        Ok(Some(result))
      }
      DedupeOutcome::CooldownActive | DedupeOutcome::BelowThreshold => Ok(None),
    }
  }

  /// Post to the device's escalation channel as a new thread.
  pub async fn escalate(
    &self,
    timer: &EscalationTimer,
  ) -> Result<NotificationResult, EngineError> {
    let policy = self.routing.policy(&timer.device_id);
    let minutes = (timer.fire_at - timer.armed_at).num_minutes();
    let message = compose_escalation(&timer.device_id, &timer.incident_id, minutes, policy);
    let channel = policy.escalation_target().to_string();
    let event_id = format!("escalation:{}", timer.version);

    let (handle, attempts) = self
      .deliver(&event_id, &timer.device_id, "escalate", || {
        self.messenger.create_thread(&channel, &message)
      })
      .await?;
    let result = NotificationResult {
      kind: NotificationKind::ThreadCreated,
      channel,
      thread_handle: handle,
      attempts,
    };
    self.audit.append(
      AuditEntry::new(&event_id, EntityType::Notification, &timer.incident_id, "SENT")
        .by(&self.actor)
        .after(json!({
          "kind": "escalation",
          "channel": result.channel,
          "threadHandle": result.thread_handle,
          "attempts": result.attempts,
        })),
    )?;
    Ok(result)
  }

  /// Reply into an existing incident thread.
  pub async fn post_reply(
    &self,
    event_id: &str,
    device_id: &str,
    entity_id: &str,
    thread: &ThreadHandle,
    message: &str,
  ) -> Result<NotificationResult, EngineError> {
    let ((), attempts) = self
      .deliver(event_id, device_id, "reply", || self.messenger.reply(thread, message))
      .await?;
    let result = NotificationResult {
      kind: NotificationKind::Reply,
      channel: self.routing.policy(device_id).channel.clone(),
      thread_handle: thread.clone(),
      attempts,
    };
    self.audit.append(
      AuditEntry::new(event_id, EntityType::Notification, entity_id, "SENT")
        .by(&self.actor)
        .after(json!({
          "kind": "reply",
          "threadHandle": result.thread_handle,
          "attempts": result.attempts,
        })),
    )?;
    Ok(result)
  }

  /// Run `op` up to `max_attempts` times, doubling the delay between tries.
  async fn deliver<T, F, Fut>(
    &self,
    event_id: &str,
    device_id: &str,
    operation: &str,
    mut op: F,
  ) -> Result<(T, u32), EngineError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
  {
    let mut last_err = DeliveryError::new("no attempt made");
    for attempt in 1..=self.max_attempts {
      match op().await {
        Ok(value) => return Ok((value, attempt)),
        Err(e) => {
          tracing::warn!(attempt, device_id, operation, error = %e, "delivery attempt failed");
          last_err = e;
          if attempt < self.max_attempts {
            tokio::time::sleep(self.base_delay * 2u32.saturating_pow(attempt - 1)).await;
          }
        }
      }
    }

    tracing::error!(
      device_id,
      operation,
      attempts = self.max_attempts,
      error = %last_err,
      "delivery failed after all retries"
    );
    self.audit.append(
      AuditEntry::new(event_id, EntityType::Notification, device_id, "FAILED")
        .by(&self.actor)
        .after(json!({
          "operation": operation,
          "attempts": self.max_attempts,
          "reason": last_err.to_string(),
        })),
    )?;
    Err(EngineError::Delivery {
      attempts: self.max_attempts,
      reason: last_err.to_string(),
    })
  }

  fn record_sent(
    &self,
    event_id: &str,
    decision: &DedupeDecision,
    result: &NotificationResult,
  ) -> Result<(), EngineError> {
    let entity = decision
      .incident_id
      .clone()
      .unwrap_or_else(|| decision.device_id.clone());
    self.audit.append(
      AuditEntry::new(event_id, EntityType::Notification, entity, "SENT")
        .by(&self.actor)
        .after(json!({
          "kind": result.kind,
          "channel": result.channel,
          "threadHandle": result.thread_handle,
          "attempts": result.attempts,
        })),
    )?;
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// Message composition
// ---------------------------------------------------------------------------

fn mentions(policy: &DevicePolicy) -> String {
  if policy.mention_users.is_empty() {
    String::new()
  } else {
    format!(" {}", policy.mention_users.join(" "))
  }
}

pub fn compose_alert(event: &IncidentEvent, policy: &DevicePolicy, critical_threshold: f64) -> String {
  if event.failure_probability >= critical_threshold {
    format!(
      "🚨 CRITICAL: Device {} failure probability {:.2} | Immediate action required{}",
      event.device_id,
      event.failure_probability,
      mentions(policy)
    )
  } else {
    format!(
      "⚠️ Device {} predicted failure: {:.2} | {} reading{}",
      event.device_id,
      event.failure_probability,
      event.sensor_type.label(),
      mentions(policy)
    )
  }
}

pub fn compose_update(event: &IncidentEvent, hit_count: u32) -> String {
  format!(
    "Update: failure probability now {:.2} ({} events in cooldown)",
    event.failure_probability, hit_count
  )
}

pub fn compose_escalation(
  device_id: &str,
  incident_id: &str,
  minutes: i64,
  policy: &DevicePolicy,
) -> String {
  format!(
    "⏫ ESCALATION: {} unacknowledged for {} minutes (incident {}){}",
    device_id,
    minutes,
    incident_id,
    mentions(policy)
  )
}
