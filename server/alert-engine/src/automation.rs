//! Automation orchestrator: rule evaluation and action execution.
//!
//! Rules (multiple action types may co-fire for one event):
//! - p >= critical AND new alert -> CREATE_CASE + ORDER_PARTS + ASSIGN_TECH
//! - p >= critical               -> escalation timer armed (CRITICAL)
//! - threshold <= p < critical   -> NOTIFY
//! - p < threshold               -> nothing
//!
//! Every action ends EXECUTED or FAILED with a reason, except ASSIGN_TECH
//! with nobody free, which stays PENDING until technician availability
//! changes. Each final status is audited exactly once. Closing an incident
//! closes its work order and cancels assignments still queued for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::audit::{AuditEntry, AuditLedger, EntityType};
use crate::collaborators::{TechnicianDirectory, WorkOrders};
use crate::config::{Config, RoutingTable};
use crate::error::{EngineError, WorkOrderError};
use crate::matching;
use crate::notify::NotificationRouter;
use crate::types::*;

/// Request to arm an escalation timer for the incident.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationRequest {
  pub priority: Priority,
  pub delay: Duration,
}

/// Planned actions for one event, all PENDING until executed.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
  pub actions: Vec<AutomationAction>,
  pub escalation: Option<EscalationRequest>,
}

/// Work wound down when an incident closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseClosure {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub work_order_id: Option<String>,
  pub work_order_closed: bool,
  /// Queued assignments dropped with the incident, each FAILED.
  pub cancelled_assignments: Vec<AutomationAction>,
}

#[derive(Debug, Clone)]
struct PendingAssignment {
  action: AutomationAction,
  work_order_id: String,
  equipment_type: String,
}

pub struct AutomationOrchestrator {
  work_orders: Arc<dyn WorkOrders>,
  directory: Arc<dyn TechnicianDirectory>,
  router: Arc<NotificationRouter>,
  routing: Arc<RoutingTable>,
  audit: Arc<AuditLedger>,
  alert_threshold: f64,
  critical_threshold: f64,
  actor: String,
  seq: AtomicU64,
  pending: Mutex<Vec<PendingAssignment>>,
  /// incident id -> work order raised for it, until the incident closes.
  cases: Mutex<HashMap<String, String>>,
}

impl AutomationOrchestrator {
  pub fn new(
    work_orders: Arc<dyn WorkOrders>,
    directory: Arc<dyn TechnicianDirectory>,
    router: Arc<NotificationRouter>,
    routing: Arc<RoutingTable>,
    audit: Arc<AuditLedger>,
    config: &Config,
  ) -> Self {
    Self {
      work_orders,
      directory,
      router,
      routing,
      audit,
      alert_threshold: config.alert_threshold,
      critical_threshold: config.critical_threshold,
      actor: config.actor.clone(),
      seq: AtomicU64::new(0),
      pending: Mutex::new(Vec::new()),
      cases: Mutex::new(HashMap::new()),
    }
  }

  /// Apply the rule table. No side effects besides allocating action ids.
  pub fn evaluate(&self, event: &IncidentEvent, decision: &DedupeDecision) -> Evaluation {
    let mut evaluation = Evaluation::default();
    if decision.outcome == DedupeOutcome::BelowThreshold {
      return evaluation;
    }

    let policy = self.routing.policy(&event.device_id);
    let threshold = policy.alert_threshold.unwrap_or(self.alert_threshold);
    let p = event.failure_probability;

    if p >= self.critical_threshold {
      if decision.outcome == DedupeOutcome::NewAlert {
        for (kind, trigger) in [
          (ActionKind::CreateCase, ActionTrigger::PredictedFailure),
          (ActionKind::OrderParts, ActionTrigger::PredictedFailure),
          (ActionKind::AssignTech, ActionTrigger::WorkOrderCreated),
        ] {
          evaluation.actions.push(self.plan(kind, trigger, decision));
        }
      }
      evaluation.escalation = Some(EscalationRequest {
        priority: Priority::Critical,
        delay: policy.escalation_delay(),
      });
    } else if p >= threshold
      && matches!(
        decision.outcome,
        DedupeOutcome::NewAlert | DedupeOutcome::ThreadUpdate
      )
    {
      evaluation
        .actions
        .push(self.plan(ActionKind::Notify, ActionTrigger::ElevatedRisk, decision));
    }
    evaluation
  }

  /// Execute planned actions in order. Returns them with final statuses plus
  /// any fallback actions raised along the way.
  pub async fn execute(
    &self,
    actions: Vec<AutomationAction>,
    event: &IncidentEvent,
    decision: &DedupeDecision,
    notification: Option<&NotificationResult>,
  ) -> Result<Vec<AutomationAction>, EngineError> {
    let policy = self.routing.policy(&event.device_id).clone();
    let event_id = event.replay_id.to_string();
    let mut work_order_id: Option<String> = None;
    let mut done = Vec::with_capacity(actions.len());

    for mut action in actions {
      match action.kind {
        ActionKind::CreateCase => {
          let spec = WorkOrderSpec {
            device_id: event.device_id.clone(),
            incident_id: decision.incident_id.clone(),
            equipment_type: policy.equipment_type.clone(),
            priority: policy.priority.max(Priority::High),
            subject: format!("Predicted failure - {}", event.device_id),
            description: format!(
              "Failure probability {:.2} from {} sensor at {}",
              event.failure_probability,
              event.sensor_type.label(),
              event.observed_at.to_rfc3339()
            ),
            failure_probability: event.failure_probability,
          };
          match self.work_orders.create_work_order(&spec).await {
            Ok(id) => {
              action.details.insert("workOrderId".into(), json!(id));
              action.details.insert("priority".into(), json!(spec.priority));
              if let Some(incident_id) = &decision.incident_id {
                self.cases_lock().insert(incident_id.clone(), id.clone());
              }
              work_order_id = Some(id);
              self.finish(&event_id, &mut action, ActionStatus::Executed, None)?;
            }
            Err(e) => self.finish(&event_id, &mut action, ActionStatus::Failed, Some(e.to_string()))?,
          }
          done.push(action);
        }
        ActionKind::OrderParts => {
          let Some(wo) = work_order_id.clone() else {
            self.finish(
              &event_id,
              &mut action,
              ActionStatus::Failed,
              Some("work order not created".into()),
            )?;
            done.push(action);
            continue;
          };
          action.details.insert("workOrderId".into(), json!(wo));
          action.details.insert("parts".into(), json!(policy.parts));
          match self.work_orders.reserve_parts(&policy.parts).await {
            Ok(reservation_id) => {
              action.details.insert("reservationId".into(), json!(reservation_id));
              self.finish(&event_id, &mut action, ActionStatus::Executed, None)?;
              done.push(action);
            }
            Err(e @ WorkOrderError::InsufficientStock { .. }) => {
              let reason = e.to_string();
              self.finish(&event_id, &mut action, ActionStatus::Failed, Some(reason.clone()))?;
              done.push(action);
              let fallback = self
                .stock_fallback(&event_id, decision, notification, &reason)
                .await?;
              done.push(fallback);
            }
            Err(e) => {
              self.finish(&event_id, &mut action, ActionStatus::Failed, Some(e.to_string()))?;
              done.push(action);
            }
          }
        }
        ActionKind::AssignTech => {
          let Some(wo) = work_order_id.clone() else {
            self.finish(
              &event_id,
              &mut action,
              ActionStatus::Failed,
              Some("work order not created".into()),
            )?;
            done.push(action);
            continue;
          };
          action.details.insert("workOrderId".into(), json!(wo));
          self
            .assign(&event_id, &mut action, &wo, &policy.equipment_type, true)
            .await?;
          done.push(action);
        }
        ActionKind::Notify => {
          match notification {
            Some(n) => {
              action.details.insert("channel".into(), json!(n.channel));
              action.details.insert("threadHandle".into(), json!(n.thread_handle));
              action.details.insert("delivery".into(), json!(n.kind));
              self.finish(&event_id, &mut action, ActionStatus::Executed, None)?;
            }
            None => self.finish(
              &event_id,
              &mut action,
              ActionStatus::Failed,
              Some("notification not delivered".into()),
            )?,
          }
          done.push(action);
        }
        ActionKind::Escalate => {
          // Escalations are raised by the scheduler, not planned per event.
          self.finish(
            &event_id,
            &mut action,
            ActionStatus::Failed,
            Some("escalation must be raised by the scheduler".into()),
          )?;
          done.push(action);
        }
      }
    }
    Ok(done)
  }

  /// Produce and execute the ESCALATE action for a fired timer.
  pub async fn escalate(&self, timer: &EscalationTimer) -> Result<AutomationAction, EngineError> {
    let mut action = AutomationAction {
      id: self.next_id(),
      kind: ActionKind::Escalate,
      trigger: ActionTrigger::UnacknowledgedCritical,
      device_id: timer.device_id.clone(),
      incident_id: Some(timer.incident_id.clone()),
      status: ActionStatus::Pending,
      details: Map::new(),
      executed_by: self.actor.clone(),
      reason: None,
      timestamp: Utc::now(),
    };
    let event_id = format!("escalation:{}", timer.version);
    action.details.insert(
      "delayMinutes".into(),
      json!((timer.fire_at - timer.armed_at).num_minutes()),
    );
    match self.router.escalate(timer).await {
      Ok(n) => {
        action.details.insert("escalatedTo".into(), json!(n.channel));
        action.details.insert("threadHandle".into(), json!(n.thread_handle));
        self.finish(&event_id, &mut action, ActionStatus::Executed, None)?;
      }
      Err(e) if e.is_fatal() => return Err(e),
      Err(e) => self.finish(&event_id, &mut action, ActionStatus::Failed, Some(e.to_string()))?,
    }
    Ok(action)
  }

  /// Retry every PENDING assignment. Returns the actions that left PENDING.
  pub async fn retry_pending(&self) -> Result<Vec<AutomationAction>, EngineError> {
    let queued: Vec<PendingAssignment> = {
      let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
      std::mem::take(&mut *pending)
    };

    let mut resolved = Vec::new();
    for item in queued {
      let mut action = item.action.clone();
      let event_id = format!("retry:{}", action.id);
      // The incident may have closed after the queue was taken.
      let open = action.incident_id.as_deref().map_or(true, |id| self.case_open(id));
      if !open {
        self.finish(&event_id, &mut action, ActionStatus::Failed, Some("incident closed".into()))?;
        resolved.push(action);
        continue;
      }
      self
        .assign(&event_id, &mut action, &item.work_order_id, &item.equipment_type, false)
        .await?;
      if action.status != ActionStatus::Pending {
        resolved.push(action);
      }
    }
    Ok(resolved)
  }

  pub fn pending_count(&self) -> usize {
    self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
  }

  /// Wind down an incident's work: drop its queued assignments (FAILED) and
  /// close its work order. Both steps are audited. A ticketing failure is
  /// audited and reported, not raised.
  pub async fn close_case(
    &self,
    event_id: &str,
    incident_id: &str,
    resolution: Resolution,
    actor: &str,
  ) -> Result<CaseClosure, EngineError> {
    let dropped: Vec<PendingAssignment> = {
      let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
      let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
        .into_iter()
        .partition(|p| p.action.incident_id.as_deref() == Some(incident_id));
      *pending = kept;
      dropped
    };

    let mut closure = CaseClosure::default();
    for item in dropped {
      let mut action = item.action;
      self.finish(event_id, &mut action, ActionStatus::Failed, Some("incident closed".into()))?;
      closure.cancelled_assignments.push(action);
    }

    let Some(work_order_id) = self.cases_lock().remove(incident_id) else {
      return Ok(closure);
    };
    let result = self
      .work_orders
      .close_work_order(&work_order_id, resolution)
      .await;
    let mut state = json!({ "incidentId": incident_id, "resolution": resolution });
    let action = match result {
      Ok(()) => {
        closure.work_order_closed = true;
        "CLOSE"
      }
      Err(e) => {
        tracing::warn!(work_order_id = %work_order_id, error = %e, "work order close failed");
        state["reason"] = json!(e.to_string());
        "CLOSE_FAILED"
      }
    };
    self.audit.append(
      AuditEntry::new(event_id, EntityType::WorkOrder, &work_order_id, action)
        .by(actor)
        .after(state),
    )?;
    closure.work_order_id = Some(work_order_id);
    Ok(closure)
  }

  fn case_open(&self, incident_id: &str) -> bool {
    self.cases_lock().contains_key(incident_id)
  }

  fn cases_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
    self.cases.lock().unwrap_or_else(|p| p.into_inner())
  }

  async fn assign(
    &self,
    event_id: &str,
    action: &mut AutomationAction,
    work_order_id: &str,
    equipment_type: &str,
    first_attempt: bool,
  ) -> Result<(), EngineError> {
    let candidates = match self.directory.list_available(equipment_type).await {
      Ok(c) => c,
      Err(e) => {
        return self.finish(event_id, action, ActionStatus::Failed, Some(e.to_string()));
      }
    };

    let ranked = matching::rank_technicians(&candidates, equipment_type);
    let Some(best) = ranked.first() else {
      let reason = EngineError::NoTechnicianAvailable {
        specialization: equipment_type.to_string(),
      }
      .to_string();
      tracing::warn!(device_id = %action.device_id, work_order_id, "no technician available; assignment pending");
      // Only the first transition into PENDING is audited.
      if first_attempt {
        self.finish(event_id, action, ActionStatus::Pending, Some(reason))?;
      }
      let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
      pending.push(PendingAssignment {
        action: action.clone(),
        work_order_id: work_order_id.to_string(),
        equipment_type: equipment_type.to_string(),
      });
      return Ok(());
    };

    match self
      .work_orders
      .assign_technician(work_order_id, &best.technician.id)
      .await
    {
      Ok(()) => {
        action.details.insert("technicianId".into(), json!(best.technician.id));
        action.details.insert("technician".into(), json!(best.technician.name));
        action.details.insert("skillMatch".into(), json!(best.score));
        self.finish(event_id, action, ActionStatus::Executed, None)
      }
      Err(e) => self.finish(event_id, action, ActionStatus::Failed, Some(e.to_string())),
    }
  }

  /// NOTIFY raised when parts cannot be reserved.
  async fn stock_fallback(
    &self,
    event_id: &str,
    decision: &DedupeDecision,
    notification: Option<&NotificationResult>,
    reason: &str,
  ) -> Result<AutomationAction, EngineError> {
    let mut action = self.plan(ActionKind::Notify, ActionTrigger::InsufficientStock, decision);
    let thread = notification
      .map(|n| n.thread_handle.clone())
      .or_else(|| decision.thread_handle.clone());
    let Some(thread) = thread else {
      self.finish(
        event_id,
        &mut action,
        ActionStatus::Failed,
        Some("no incident thread for stock notice".into()),
      )?;
      return Ok(action);
    };

    let message = format!("Parts reservation failed: {}. Manual ordering required.", reason);
    match self
      .router
      .post_reply(event_id, &decision.device_id, &action.id, &thread, &message)
      .await
    {
      Ok(n) => {
        action.details.insert("threadHandle".into(), json!(n.thread_handle));
        action.details.insert("message".into(), json!(message));
        self.finish(event_id, &mut action, ActionStatus::Executed, None)?;
      }
      Err(e) if e.is_fatal() => return Err(e),
      Err(e) => self.finish(event_id, &mut action, ActionStatus::Failed, Some(e.to_string()))?,
    }
    Ok(action)
  }

  fn plan(&self, kind: ActionKind, trigger: ActionTrigger, decision: &DedupeDecision) -> AutomationAction {
    AutomationAction {
      id: self.next_id(),
      kind,
      trigger,
      device_id: decision.device_id.clone(),
      incident_id: decision.incident_id.clone(),
      status: ActionStatus::Pending,
      details: Map::new(),
      executed_by: self.actor.clone(),
      reason: None,
      timestamp: Utc::now(),
    }
  }

  /// Set the final status and audit the transition.
  fn finish(
    &self,
    event_id: &str,
    action: &mut AutomationAction,
    status: ActionStatus,
    reason: Option<String>,
  ) -> Result<(), EngineError> {
    let previous = json!({ "status": action.status });
    action.status = status;
    action.reason = reason;
    action.timestamp = Utc::now();

    let mut state = Map::new();
    state.insert("kind".into(), json!(action.kind));
    state.insert("status".into(), json!(action.status));
    state.insert("details".into(), Value::Object(action.details.clone()));
    if let Some(r) = &action.reason {
      state.insert("reason".into(), json!(r));
    }
    self.audit.append(
      AuditEntry::new(event_id, EntityType::AutomationAction, &action.id, status.as_str())
        .by(&self.actor)
        .before(previous)
        .after(Value::Object(state)),
    )?;

    match status {
      ActionStatus::Executed => tracing::info!(
        action_id = %action.id,
        kind = action.kind.as_str(),
        device_id = %action.device_id,
        "action executed"
      ),
      ActionStatus::Failed => tracing::warn!(
        action_id = %action.id,
        kind = action.kind.as_str(),
        device_id = %action.device_id,
        reason = action.reason.as_deref().unwrap_or(""),
        "action failed"
      ),
      ActionStatus::Pending => {}
    }
    Ok(())
  }

  fn next_id(&self) -> String {
    format!("act-{:06}", self.seq.fetch_add(1, Ordering::Relaxed) + 1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collaborators::memory::{InMemoryWorkOrders, LoggingMessenger, StaticTechnicianDirectory};
  use crate::cooldown::CooldownStore;
  use chrono::TimeZone;
  use std::collections::HashMap;

  const ROUTING: &str = r##"[
    {"deviceId": "EQ-001-ACME", "equipmentType": "pump", "channel": "#maintenance-line3", "priority": "critical",
     "escalationChannel": "#plant-managers", "escalationDelayMinutes": 15,
     "parts": [{"part_id": "part-002", "quantity": 2}]}
  ]"##;

  struct Fixture {
    orchestrator: AutomationOrchestrator,
    orders: Arc<InMemoryWorkOrders>,
    directory: Arc<StaticTechnicianDirectory>,
    audit: Arc<AuditLedger>,
  }

  fn fixture(stock: u32, technicians: Vec<Technician>) -> Fixture {
    let config = Config {
      delivery_base_delay: Duration::from_millis(0),
      ..Config::default()
    };
    let audit = Arc::new(AuditLedger::new());
    let routing = Arc::new(RoutingTable::from_json_str(ROUTING, &config).unwrap());
    let cooldowns = Arc::new(CooldownStore::new(audit.clone(), "test"));
    let router = Arc::new(NotificationRouter::new(
      Arc::new(LoggingMessenger::new()),
      routing.clone(),
      cooldowns,
      audit.clone(),
      &config,
    ));
    let orders = Arc::new(InMemoryWorkOrders::new(HashMap::from([(
      "part-002".to_string(),
      stock,
    )])));
    let directory = Arc::new(StaticTechnicianDirectory::new(technicians));
    Fixture {
      orchestrator: AutomationOrchestrator::new(
        orders.clone(),
        directory.clone(),
        router,
        routing,
        audit.clone(),
        &config,
      ),
      orders,
      directory,
      audit,
    }
  }

  fn john(available: bool) -> Technician {
    Technician {
      id: "tech-001".into(),
      name: "John Smith".into(),
      specializations: vec!["pumps".into(), "hydraulics".into()],
      available,
      workload: 0,
      rating: 4.8,
    }
  }

  fn event(p: f64) -> IncidentEvent {
    IncidentEvent {
      device_id: "EQ-001-ACME".into(),
      observed_at: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
      failure_probability: p,
      sensor_type: SensorType::Temperature,
      payload: Value::Null,
      replay_id: 1001,
    }
  }

  fn decision(outcome: DedupeOutcome) -> DedupeDecision {
    DedupeDecision {
      event_replay_id: 1001,
      device_id: "EQ-001-ACME".into(),
      outcome,
      incident_id: Some("inc-0123456789abcdef".into()),
      thread_handle: None,
      hit_count: 1,
    }
  }

  fn routed() -> NotificationResult {
    NotificationResult {
      kind: NotificationKind::ThreadCreated,
      channel: "#maintenance-line3".into(),
      thread_handle: ThreadHandle("1704096000.000100".into()),
      attempts: 1,
    }
  }

  fn kinds(actions: &[AutomationAction]) -> Vec<ActionKind> {
    actions.iter().map(|a| a.kind).collect()
  }

  #[test]
  fn rule_table() {
    let f = fixture(10, vec![]);
    let e = f.orchestrator.evaluate(&event(0.92), &decision(DedupeOutcome::NewAlert));
    assert_eq!(
      kinds(&e.actions),
      vec![ActionKind::CreateCase, ActionKind::OrderParts, ActionKind::AssignTech]
    );
    let esc = e.escalation.unwrap();
    assert_eq!(esc.priority, Priority::Critical);
    assert_eq!(esc.delay, Duration::from_secs(15 * 60));

    let e = f.orchestrator.evaluate(&event(0.94), &decision(DedupeOutcome::ThreadUpdate));
    assert!(e.actions.is_empty());
    assert!(e.escalation.is_some());

    let e = f.orchestrator.evaluate(&event(0.85), &decision(DedupeOutcome::NewAlert));
    assert_eq!(e.actions.len(), 3);

    let e = f.orchestrator.evaluate(&event(0.62), &decision(DedupeOutcome::NewAlert));
    assert_eq!(kinds(&e.actions), vec![ActionKind::Notify]);
    assert!(e.escalation.is_none());

    let e = f.orchestrator.evaluate(&event(0.62), &decision(DedupeOutcome::CooldownActive));
    assert!(e.actions.is_empty());

    let e = f.orchestrator.evaluate(&event(0.3), &decision(DedupeOutcome::BelowThreshold));
    assert!(e.actions.is_empty());
    assert!(e.escalation.is_none());
  }

  #[tokio::test]
  async fn critical_new_alert_executes_all_three() {
    let f = fixture(10, vec![john(true)]);
    let d = decision(DedupeOutcome::NewAlert);
    let ev = event(0.92);
    let plan = f.orchestrator.evaluate(&ev, &d);
    let done = f
      .orchestrator
      .execute(plan.actions, &ev, &d, Some(&routed()))
      .await
      .unwrap();

    assert!(done.iter().all(|a| a.status == ActionStatus::Executed));
    assert_eq!(done[0].details["workOrderId"], "WO-0001");
    assert_eq!(done[2].details["technicianId"], "tech-001");
    assert_eq!(f.orders.stock("part-002"), 8);
    assert_eq!(f.orders.work_orders()[0].technician_id.as_deref(), Some("tech-001"));
    assert_eq!(f.audit.len(), 3);
  }

  #[tokio::test]
  async fn insufficient_stock_fails_order_and_raises_notify() {
    let f = fixture(1, vec![john(true)]);
    let d = decision(DedupeOutcome::NewAlert);
    let ev = event(0.92);
    let plan = f.orchestrator.evaluate(&ev, &d);
    let done = f
      .orchestrator
      .execute(plan.actions, &ev, &d, Some(&routed()))
      .await
      .unwrap();

    assert_eq!(
      kinds(&done),
      vec![
        ActionKind::CreateCase,
        ActionKind::OrderParts,
        ActionKind::Notify,
        ActionKind::AssignTech
      ]
    );
    assert_eq!(done[1].status, ActionStatus::Failed);
    assert!(done[1].reason.as_deref().unwrap().contains("insufficient stock"));
    assert_eq!(done[2].trigger, ActionTrigger::InsufficientStock);
    assert_eq!(done[2].status, ActionStatus::Executed);
    assert_eq!(done[3].status, ActionStatus::Executed);
    assert_eq!(f.orders.stock("part-002"), 1);
  }

  #[tokio::test]
  async fn no_technician_stays_pending_until_availability_changes() {
    let f = fixture(10, vec![john(false)]);
    let d = decision(DedupeOutcome::NewAlert);
    let ev = event(0.92);
    let plan = f.orchestrator.evaluate(&ev, &d);
    let done = f
      .orchestrator
      .execute(plan.actions, &ev, &d, Some(&routed()))
      .await
      .unwrap();
    assert_eq!(done[2].status, ActionStatus::Pending);
    assert_eq!(f.orchestrator.pending_count(), 1);

    // Still nobody free: stays queued, no extra audit.
    let audited = f.audit.len();
    assert!(f.orchestrator.retry_pending().await.unwrap().is_empty());
    assert_eq!(f.orchestrator.pending_count(), 1);
    assert_eq!(f.audit.len(), audited);

    f.directory.set_available("tech-001", true);
    let resolved = f.orchestrator.retry_pending().await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, ActionStatus::Executed);
    assert_eq!(resolved[0].id, done[2].id);
    assert_eq!(f.orchestrator.pending_count(), 0);
  }

  #[tokio::test]
  async fn notify_reflects_routing_result() {
    let f = fixture(10, vec![]);
    let d = decision(DedupeOutcome::NewAlert);
    let ev = event(0.62);
    let plan = f.orchestrator.evaluate(&ev, &d);
    let done = f
      .orchestrator
      .execute(plan.actions.clone(), &ev, &d, Some(&routed()))
      .await
      .unwrap();
    assert_eq!(done[0].status, ActionStatus::Executed);

    let plan = f.orchestrator.evaluate(&ev, &d);
    let done = f.orchestrator.execute(plan.actions, &ev, &d, None).await.unwrap();
    assert_eq!(done[0].status, ActionStatus::Failed);
  }

  #[tokio::test]
  async fn closing_the_case_closes_work_order_and_drops_queued_assignment() {
    let f = fixture(10, vec![john(false)]);
    let d = decision(DedupeOutcome::NewAlert);
    let ev = event(0.92);
    let plan = f.orchestrator.evaluate(&ev, &d);
    let done = f
      .orchestrator
      .execute(plan.actions, &ev, &d, Some(&routed()))
      .await
      .unwrap();
    assert_eq!(done[2].status, ActionStatus::Pending);

    let closure = f
      .orchestrator
      .close_case("close:EQ-001-ACME", "inc-0123456789abcdef", Resolution::FalsePositive, "jane.doe")
      .await
      .unwrap();
    assert_eq!(closure.work_order_id.as_deref(), Some("WO-0001"));
    assert!(closure.work_order_closed);
    assert_eq!(closure.cancelled_assignments.len(), 1);
    assert_eq!(closure.cancelled_assignments[0].status, ActionStatus::Failed);
    assert_eq!(closure.cancelled_assignments[0].reason.as_deref(), Some("incident closed"));
    assert_eq!(f.orchestrator.pending_count(), 0);
    assert_eq!(f.orders.work_orders()[0].resolution, Some(Resolution::FalsePositive));

    let last = f.audit.records().pop().unwrap();
    assert_eq!((last.entity_type.as_str(), last.action.as_str()), ("WorkOrder", "CLOSE"));
    assert_eq!(last.performed_by, "jane.doe");

    // Nothing left to assign once a technician frees up.
    f.directory.set_available("tech-001", true);
    assert!(f.orchestrator.retry_pending().await.unwrap().is_empty());
    assert_eq!(f.orders.work_orders()[0].technician_id, None);

    // Closing again is a no-op.
    let again = f
      .orchestrator
      .close_case("close:EQ-001-ACME", "inc-0123456789abcdef", Resolution::FalsePositive, "jane.doe")
      .await
      .unwrap();
    assert_eq!(again, CaseClosure::default());
  }
}
