//! Core engine: wires the pipeline and owns per-device serialization.
//!
//! Data flow per event:
//!
//! ```text
//! validate -> [device lock: halted? -> replay check -> classify] -> route
//!          -> evaluate/execute actions -> [device lock: arm escalation] -> metrics
//! ```
//!
//! The device lock never spans a collaborator call. Escalation timers are
//! tokio tasks holding a weak reference to the engine; they re-enter the
//! device lock and must win `EscalationScheduler::begin_fire` to post.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::AuditLedger;
use crate::automation::{AutomationOrchestrator, CaseClosure};
use crate::collaborators::Collaborators;
use crate::config::{Config, RoutingTable};
use crate::cooldown::CooldownStore;
use crate::dedupe::Deduplicator;
use crate::error::EngineError;
use crate::escalation::{ArmResult, EscalationScheduler};
use crate::locks::KeyedLocks;
use crate::metrics::MetricsAggregator;
use crate::normalize::{self, Normalizer};
use crate::notify::NotificationRouter;
use crate::types::*;

/// Result of closing an incident.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentClosure {
  pub device_id: String,
  pub resolution: Resolution,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cooldown: Option<CooldownEntry>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub escalation: Option<EscalationTimer>,
  #[serde(flatten)]
  pub case: CaseClosure,
}

/// The alert pipeline. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
  inner: Arc<Inner>,
}

struct Inner {
  config: Config,
  normalizer: Normalizer,
  locks: KeyedLocks,
  cooldowns: Arc<CooldownStore>,
  dedupe: Deduplicator,
  router: Arc<NotificationRouter>,
  automation: AutomationOrchestrator,
  escalations: EscalationScheduler,
  audit: Arc<AuditLedger>,
  metrics: MetricsAggregator,
  halted: Mutex<HashSet<String>>,
  /// Latest `observed_at` admitted; cooldowns expire against event time.
  event_clock: Mutex<Option<DateTime<Utc>>>,
}

impl Engine {
  pub fn new(config: Config, routing: RoutingTable, collaborators: Collaborators) -> Self {
    let routing = Arc::new(routing);
    let audit = Arc::new(AuditLedger::new());
    let cooldowns = Arc::new(CooldownStore::new(audit.clone(), config.actor.clone()));
    let router = Arc::new(NotificationRouter::new(
      collaborators.messenger,
      routing.clone(),
      cooldowns.clone(),
      audit.clone(),
      &config,
    ));
    let automation = AutomationOrchestrator::new(
      collaborators.work_orders,
      collaborators.directory,
      router.clone(),
      routing.clone(),
      audit.clone(),
      &config,
    );

    Self {
      inner: Arc::new(Inner {
        normalizer: Normalizer::new(),
        locks: KeyedLocks::new(),
        dedupe: Deduplicator::new(
          cooldowns.clone(),
          routing,
          config.alert_threshold,
          config.cooldown,
        ),
        escalations: EscalationScheduler::new(audit.clone(), config.actor.clone()),
        metrics: MetricsAggregator::new(),
        halted: Mutex::new(HashSet::new()),
        event_clock: Mutex::new(None),
        cooldowns,
        router,
        automation,
        audit,
        config,
      }),
    }
  }

  /// Process one raw event end to end.
  pub async fn process(&self, raw: &RawEvent) -> Result<ProcessOutcome, EngineError> {
    let started = Instant::now();
    let inner = &self.inner;
    inner.metrics.record_received(Utc::now());

    let event = normalize::validate(raw).map_err(|e| {
      tracing::warn!(replay_id = raw.replay_id, error = %e, "event rejected");
      e
    })?;
    let device_id = event.device_id.clone();
    let event_id = event.replay_id.to_string();

    let decision = {
      let _guard = inner.locks.lock(&device_id).await;
      self.ensure_running(&device_id)?;
      if let Err(e) = inner.normalizer.admit(&event) {
        tracing::warn!(device_id = %device_id, error = %e, "stale event dropped");
        return Err(e);
      }
      self.advance_clock(event.observed_at);
      self.guard(&device_id, inner.dedupe.classify(&event))?
    };

    if decision.outcome == DedupeOutcome::NewAlert {
      tracing::info!(
        device_id = %device_id,
        incident_id = decision.incident_id.as_deref().unwrap_or(""),
        failure_probability = event.failure_probability,
        "new incident opened"
      );
    }

    let notification = match inner.router.route(&decision, &event).await {
      Ok(n) => n,
      Err(e) if e.is_fatal() => return Err(self.halt(&device_id, e)),
      // Already audited as FAILED by the router.
      Err(_) => None,
    };

    let evaluation = inner.automation.evaluate(&event, &decision);
    let actions = self.guard(
      &device_id,
      inner
        .automation
        .execute(evaluation.actions, &event, &decision, notification.as_ref())
        .await,
    )?;

    let escalation = match (evaluation.escalation, &decision.incident_id) {
      (Some(request), Some(incident_id)) => {
        self
          .arm_escalation(&event_id, &event, incident_id, request.delay)
          .await?
      }
      _ => None,
    };

    let outcome = ProcessOutcome {
      decision,
      notification,
      actions,
      escalation,
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    inner.metrics.record(Utc::now(), &outcome, elapsed_ms);
    Ok(outcome)
  }

  /// Cancel a pending escalation. The cooldown entry stays open.
  pub async fn acknowledge(
    &self,
    device_id: &str,
    actor: &str,
  ) -> Result<Option<EscalationTimer>, EngineError> {
    let device_id = normalize::canonical_device_id(device_id);
    let _guard = self.inner.locks.lock(&device_id).await;
    self.ensure_running(&device_id)?;
    let event_id = format!("ack:{}", device_id);
    self.guard(
      &device_id,
      self.inner.escalations.acknowledge(&event_id, &device_id, actor),
    )
  }

  /// Close the device's incident: the timer first, then the cooldown entry,
  /// then the incident's work order and queued assignments.
  pub async fn close_incident(
    &self,
    device_id: &str,
    actor: &str,
    resolution: Resolution,
  ) -> Result<IncidentClosure, EngineError> {
    let device_id = normalize::canonical_device_id(device_id);
    let event_id = format!("close:{}", device_id);

    let (escalation, cooldown) = {
      let _guard = self.inner.locks.lock(&device_id).await;
      self.ensure_running(&device_id)?;
      let escalation = self.guard(
        &device_id,
        self.inner.escalations.close(&event_id, &device_id, actor),
      )?;
      let cooldown = self.guard(
        &device_id,
        self.inner.cooldowns.close(&event_id, &device_id, actor),
      )?;
      (escalation, cooldown)
    };

    // Ticketing is called outside the device lock.
    let incident_id = cooldown
      .as_ref()
      .map(|c| c.incident_id.clone())
      .or_else(|| escalation.as_ref().map(|t| t.incident_id.clone()));
    let case = match incident_id {
      Some(incident_id) => self.guard(
        &device_id,
        self
          .inner
          .automation
          .close_case(&event_id, &incident_id, resolution, actor)
          .await,
      )?,
      None => CaseClosure::default(),
    };

    if cooldown.is_some() && resolution == Resolution::FalsePositive {
      self.inner.metrics.record_false_positive(Utc::now());
    }
    tracing::info!(
      device_id = %device_id,
      actor,
      ?resolution,
      work_order_id = case.work_order_id.as_deref().unwrap_or(""),
      cancelled_assignments = case.cancelled_assignments.len(),
      "incident closed"
    );
    Ok(IncidentClosure {
      device_id,
      resolution,
      cooldown,
      escalation,
      case,
    })
  }

  /// Remove cooldown entries expired at `now`. Escalations are unaffected.
  pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<CooldownEntry>, EngineError> {
    let removed = self.inner.cooldowns.sweep(now)?;
    let pruned = self.inner.locks.prune();
    if !removed.is_empty() {
      tracing::debug!(expired = removed.len(), pruned_locks = pruned, "cooldown sweep");
    }
    Ok(removed)
  }

  /// Retry PENDING technician assignments.
  pub async fn technician_availability_changed(&self) -> Result<Vec<AutomationAction>, EngineError> {
    let resolved = self.inner.automation.retry_pending().await?;
    self.inner.metrics.record_actions(Utc::now(), &resolved);
    Ok(resolved)
  }

  /// Verify the audit chain; halts the ledger on mismatch.
  pub fn verify_audit(&self) -> Result<(), EngineError> {
    self.inner.audit.check_chain()
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  pub fn audit(&self) -> &AuditLedger {
    &self.inner.audit
  }

  pub fn metrics(&self) -> &MetricsAggregator {
    &self.inner.metrics
  }

  pub fn cooldown(&self, device_id: &str, now: DateTime<Utc>) -> Result<Option<CooldownEntry>, EngineError> {
    self
      .inner
      .cooldowns
      .lookup(&normalize::canonical_device_id(device_id), now)
  }

  pub fn escalation(&self, device_id: &str) -> Option<EscalationTimer> {
    self
      .inner
      .escalations
      .get(&normalize::canonical_device_id(device_id))
  }

  /// Latest event time admitted so far. Sweeps should run against this,
  /// not the wall clock, so backfilled history keeps its windows.
  pub fn event_clock(&self) -> Option<DateTime<Utc>> {
    *self.inner.event_clock.lock().unwrap_or_else(|p| p.into_inner())
  }

  pub fn pending_assignments(&self) -> usize {
    self.inner.automation.pending_count()
  }

  pub fn is_halted(&self, device_id: &str) -> bool {
    let halted = self.inner.halted.lock().unwrap_or_else(|p| p.into_inner());
    halted.contains(&normalize::canonical_device_id(device_id))
  }

  // -------------------------------------------------------------------------
  // Escalation timers
  // -------------------------------------------------------------------------

  async fn arm_escalation(
    &self,
    event_id: &str,
    event: &IncidentEvent,
    incident_id: &str,
    delay: Duration,
  ) -> Result<Option<EscalationTimer>, EngineError> {
    let inner = &self.inner;
    let device_id = &event.device_id;
    let _guard = inner.locks.lock(device_id).await;

    // The incident may have been closed while actions ran.
    let live = self.guard(device_id, inner.cooldowns.lookup(device_id, event.observed_at))?;
    if live.map(|e| e.incident_id).as_deref() != Some(incident_id) {
      return Ok(None);
    }

    let armed = self.guard(
      device_id,
      inner
        .escalations
        .arm(event_id, device_id, incident_id, Utc::now(), delay),
    )?;
    match armed {
      ArmResult::Armed(timer) => {
        self.spawn_timer(&timer, delay);
        Ok(Some(timer))
      }
      ArmResult::AlreadyArmed(timer) => Ok(Some(timer)),
    }
  }

  fn spawn_timer(&self, timer: &EscalationTimer, delay: Duration) {
    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    let device_id = timer.device_id.clone();
    let version = timer.version;

    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let Some(inner) = weak.upgrade() else {
        return;
      };
      let engine = Engine { inner };
      if let Err(e) = engine.fire_escalation(&device_id, version).await {
        tracing::error!(device_id = %device_id, version, error = %e, "escalation failed");
      }
    });
    self
      .inner
      .escalations
      .attach_task(&timer.device_id, version, task.abort_handle());
  }

  /// Fire the timer armed as `version`, unless it was acknowledged, closed
  /// or superseded first.
  pub async fn fire_escalation(
    &self,
    device_id: &str,
    version: u64,
  ) -> Result<Option<AutomationAction>, EngineError> {
    let timer = {
      let _guard = self.inner.locks.lock(device_id).await;
      self.ensure_running(device_id)?;
      self.guard(device_id, self.inner.escalations.begin_fire(device_id, version))?
    };
    let Some(timer) = timer else {
      return Ok(None);
    };

    let action = self.guard(device_id, self.inner.automation.escalate(&timer).await)?;
    self
      .inner
      .metrics
      .record_actions(Utc::now(), std::slice::from_ref(&action));
    Ok(Some(action))
  }

  // -------------------------------------------------------------------------
  // Fatal error handling
  // -------------------------------------------------------------------------

  fn ensure_running(&self, device_id: &str) -> Result<(), EngineError> {
    let halted = self.inner.halted.lock().unwrap_or_else(|p| p.into_inner());
    if halted.contains(device_id) {
      return Err(EngineError::DeviceHalted {
        device_id: device_id.to_string(),
      });
    }
    Ok(())
  }

  fn advance_clock(&self, observed_at: DateTime<Utc>) {
    let mut clock = self.inner.event_clock.lock().unwrap_or_else(|p| p.into_inner());
    if clock.map_or(true, |c| observed_at > c) {
      *clock = Some(observed_at);
    }
  }

  fn guard<T>(&self, device_id: &str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    result.map_err(|e| if e.is_fatal() { self.halt(device_id, e) } else { e })
  }

  fn halt(&self, device_id: &str, error: EngineError) -> EngineError {
    if !matches!(error, EngineError::DeviceHalted { .. }) {
      tracing::error!(device_id, error = %error, "fatal error; halting device");
      let mut halted = self.inner.halted.lock().unwrap_or_else(|p| p.into_inner());
      halted.insert(device_id.to_string());
    }
    error
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collaborators::memory::{InMemoryStack, LoggingMessenger, Roster};
  use crate::collaborators::Messenger;
  use crate::error::DeliveryError;
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use tokio::sync::Notify;

  fn stack() -> InMemoryStack {
    InMemoryStack::from_roster(Roster {
      technicians: vec![],
      inventory: HashMap::new(),
    })
  }

  fn engine_with(stack: &InMemoryStack, messenger: Arc<dyn Messenger>) -> Engine {
    let config = Config {
      delivery_base_delay: Duration::from_millis(0),
      ..Config::default()
    };
    let routing = RoutingTable::from_json_str(
      r##"[{"deviceId": "EQ-001-ACME", "equipmentType": "pump", "channel": "#maintenance-line3",
            "priority": "critical", "escalationChannel": "#plant-managers", "escalationDelayMinutes": 15}]"##,
      &config,
    )
    .unwrap();
    let collaborators = Collaborators {
      messenger,
      ..stack.collaborators()
    };
    Engine::new(config, routing, collaborators)
  }

  fn engine() -> (Engine, InMemoryStack) {
    let stack = stack();
    (engine_with(&stack, stack.messenger.clone()), stack)
  }

  /// Chat outage: every attempt fails.
  struct DownMessenger;

  #[async_trait]
  impl Messenger for DownMessenger {
    async fn create_thread(&self, _channel: &str, _message: &str) -> Result<ThreadHandle, DeliveryError> {
      Err(DeliveryError::new("503 service unavailable"))
    }

    async fn reply(&self, _thread: &ThreadHandle, _message: &str) -> Result<(), DeliveryError> {
      Err(DeliveryError::new("503 service unavailable"))
    }
  }

  /// Holds the first thread created on `channel` until released.
  struct HeldMessenger {
    inner: LoggingMessenger,
    channel: String,
    held: AtomicBool,
    entered: Notify,
    release: Notify,
  }

  impl HeldMessenger {
    fn on(channel: &str) -> Arc<Self> {
      Arc::new(Self {
        inner: LoggingMessenger::new(),
        channel: channel.to_string(),
        held: AtomicBool::new(false),
        entered: Notify::new(),
        release: Notify::new(),
      })
    }
  }

  #[async_trait]
  impl Messenger for HeldMessenger {
    async fn create_thread(&self, channel: &str, message: &str) -> Result<ThreadHandle, DeliveryError> {
      if channel == self.channel && !self.held.swap(true, Ordering::SeqCst) {
        self.entered.notify_one();
        self.release.notified().await;
      }
      self.inner.create_thread(channel, message).await
    }

    async fn reply(&self, thread: &ThreadHandle, message: &str) -> Result<(), DeliveryError> {
      self.inner.reply(thread, message).await
    }
  }

  fn at(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
  }

  fn raw(device: &str, p: f64, replay_id: u64, ts: &str) -> RawEvent {
    RawEvent {
      device_id: device.into(),
      timestamp: ts.into(),
      sensor_type: "Temperature".into(),
      failure_probability: p,
      payload: serde_json::Value::Null,
      replay_id,
    }
  }

  #[tokio::test]
  async fn stale_replay_is_rejected_without_side_effects() {
    let (engine, stack) = engine();
    engine
      .process(&raw("EQ-001-ACME", 0.62, 10, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    let audited = engine.audit().len();
    let err = engine
      .process(&raw("EQ-001-ACME", 0.62, 10, "2026-01-01T08:00:30Z"))
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::StaleEvent { last_seen: 10, .. }));
    assert_eq!(engine.audit().len(), audited);
    assert_eq!(stack.messenger.sent().len(), 1);
  }

  #[tokio::test]
  async fn close_then_reopen_starts_a_new_incident() {
    let (engine, _) = engine();
    let first = engine
      .process(&raw("EQ-001-ACME", 0.62, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    let closure = engine
      .close_incident("eq-001-acme", "jane.doe", Resolution::FalsePositive)
      .await
      .unwrap();
    assert!(closure.cooldown.is_some());

    let second = engine
      .process(&raw("EQ-001-ACME", 0.62, 2, "2026-01-01T08:01:00Z"))
      .await
      .unwrap();
    assert_eq!(second.decision.outcome, DedupeOutcome::NewAlert);
    assert_ne!(first.decision.incident_id, second.decision.incident_id);

    let today = crate::metrics::day_bucket(&Utc::now());
    let window = engine.metrics().snapshot(&today);
    assert_eq!(window.false_positive_rate, 0.5);
  }

  #[tokio::test]
  async fn halted_device_rejects_further_work() {
    let (engine, _) = engine();
    engine
      .inner
      .halted
      .lock()
      .unwrap()
      .insert("EQ-001-ACME".to_string());
    let err = engine
      .process(&raw("EQ-001-ACME", 0.92, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::DeviceHalted { .. }));
    assert!(engine.is_halted("eq-001-acme"));
    // Other devices are unaffected.
    engine
      .process(&raw("EQ-002-ACME", 0.92, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn sweep_removes_expired_entries() {
    let (engine, _) = engine();
    engine
      .process(&raw("EQ-001-ACME", 0.62, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    let later = at("2026-01-01T08:10:00Z");
    let removed = engine.sweep_expired(later).unwrap();
    assert_eq!(removed.len(), 1);
    assert!(engine.cooldown("EQ-001-ACME", later).unwrap().is_none());
    let last = engine.audit().records().pop().unwrap();
    assert_eq!(last.action, "EXPIRE");
  }

  #[tokio::test]
  async fn late_thread_from_a_closed_incident_stays_off_its_successor() {
    let stack = stack();
    let messenger = HeldMessenger::on("#maintenance-line3");
    let engine = engine_with(&stack, messenger.clone());

    let first = tokio::spawn({
      let engine = engine.clone();
      async move {
        engine
          .process(&raw("EQ-001-ACME", 0.92, 1, "2026-01-01T08:00:05Z"))
          .await
      }
    });
    messenger.entered.notified().await;

    let closure = engine
      .close_incident("EQ-001-ACME", "jane.doe", Resolution::Repaired)
      .await
      .unwrap();
    assert!(closure.cooldown.is_some());

    let second = engine
      .process(&raw("EQ-001-ACME", 0.60, 2, "2026-01-01T08:00:40Z"))
      .await
      .unwrap();
    assert_eq!(second.decision.outcome, DedupeOutcome::NewAlert);
    let own_thread = second.notification.unwrap().thread_handle;

    messenger.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_ne!(first.decision.incident_id, second.decision.incident_id);

    let live = engine
      .cooldown("EQ-001-ACME", at("2026-01-01T08:00:41Z"))
      .unwrap()
      .unwrap();
    assert_eq!(live.incident_id, second.decision.incident_id.unwrap());
    assert_eq!(live.thread_handle, Some(own_thread));
    // The critical escalation belonged to the closed incident.
    assert!(first.escalation.is_none());
    assert!(engine.escalation("EQ-001-ACME").is_none());
  }

  #[tokio::test]
  async fn failure_rate_counts_each_event_once_during_outage() {
    let stack = stack();
    let engine = engine_with(&stack, Arc::new(DownMessenger));
    let elevated = engine
      .process(&raw("EQ-001-ACME", 0.62, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    assert!(elevated.notification.is_none());
    assert_eq!(elevated.actions[0].status, ActionStatus::Failed);

    let window = engine
      .metrics()
      .snapshot(&crate::metrics::day_bucket(&Utc::now()));
    assert_eq!(window.events_processed, 1);
    assert_eq!(window.failure_rate, 1.0);
  }

  #[tokio::test]
  async fn closing_winds_down_work_order_and_queued_assignment() {
    let (engine, stack) = engine();
    let outcome = engine
      .process(&raw("EQ-001-ACME", 0.92, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    // No technicians on the roster.
    assert_eq!(outcome.actions[2].status, ActionStatus::Pending);
    assert_eq!(engine.pending_assignments(), 1);

    let closure = engine
      .close_incident("EQ-001-ACME", "jane.doe", Resolution::FalsePositive)
      .await
      .unwrap();
    assert_eq!(closure.case.work_order_id.as_deref(), Some("WO-0001"));
    assert!(closure.case.work_order_closed);
    assert_eq!(closure.case.cancelled_assignments.len(), 1);
    assert_eq!(engine.pending_assignments(), 0);
    assert_eq!(
      stack.work_orders.work_orders()[0].resolution,
      Some(Resolution::FalsePositive)
    );

    let json = serde_json::to_value(&closure).unwrap();
    assert_eq!(json["workOrderId"], "WO-0001");
    assert_eq!(json["cancelledAssignments"][0]["status"], "FAILED");
    engine.verify_audit().unwrap();
  }

  #[tokio::test]
  async fn chain_failure_while_escalating_halts_the_device() {
    let stack = stack();
    let messenger = HeldMessenger::on("#plant-managers");
    let engine = engine_with(&stack, messenger.clone());
    let outcome = engine
      .process(&raw("EQ-001-ACME", 0.92, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    let version = outcome.escalation.unwrap().version;

    let firing = tokio::spawn({
      let engine = engine.clone();
      async move { engine.fire_escalation("EQ-001-ACME", version).await }
    });
    messenger.entered.notified().await;
    engine.inner.audit.force_halt();
    messenger.release.notify_one();

    let err = firing.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::ChainIntegrity { .. }));
    assert!(engine.is_halted("EQ-001-ACME"));
  }

  #[tokio::test]
  async fn event_clock_tracks_latest_observation() {
    let (engine, _) = engine();
    assert!(engine.event_clock().is_none());
    engine
      .process(&raw("EQ-001-ACME", 0.62, 1, "2026-01-01T08:00:00Z"))
      .await
      .unwrap();
    engine
      .process(&raw("EQ-002-ACME", 0.2, 1, "2025-12-31T23:00:00Z"))
      .await
      .unwrap();
    let clock = engine.event_clock().unwrap();
    assert_eq!(clock, at("2026-01-01T08:00:00Z"));

    // Backfilled history survives a sweep against event time.
    assert!(engine.sweep_expired(clock).unwrap().is_empty());
    assert!(engine.cooldown("EQ-001-ACME", clock).unwrap().is_some());
  }
}
