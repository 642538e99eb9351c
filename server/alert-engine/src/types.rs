//! Core types for the alert engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the event source sends)
// ---------------------------------------------------------------------------

/// One raw device event. Unknown fields are silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
  #[serde(alias = "device_id")]
  pub device_id: String,
  #[serde(alias = "createdDate", alias = "observed_at")]
  pub timestamp: String,
  #[serde(alias = "sensor_type")]
  pub sensor_type: String,
  #[serde(alias = "failure_probability")]
  pub failure_probability: f64,
  #[serde(default)]
  pub payload: serde_json::Value,
  #[serde(alias = "replay_id")]
  pub replay_id: u64,
}

// ---------------------------------------------------------------------------
// Enums (normalized)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorType {
  Temperature,
  Vibration,
  Pressure,
  Rpm,
  Power,
}

impl SensorType {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "temperature" | "temp" => Some(Self::Temperature),
      "vibration" | "vib" => Some(Self::Vibration),
      "pressure" | "press" => Some(Self::Pressure),
      "rpm" => Some(Self::Rpm),
      "power" => Some(Self::Power),
      _ => None,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::Temperature => "Temperature",
      Self::Vibration => "Vibration",
      Self::Pressure => "Pressure",
      Self::Rpm => "RPM",
      Self::Power => "Power",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  Medium,
  High,
  Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
  Repaired,
  FalsePositive,
}

// ---------------------------------------------------------------------------
// Incident event
// ---------------------------------------------------------------------------

/// Canonical internal event after normalization + validation. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentEvent {
  pub device_id: String,
  pub observed_at: DateTime<Utc>,
  pub failure_probability: f64,
  pub sensor_type: SensorType,
  pub payload: serde_json::Value,
  pub replay_id: u64,
}

// ---------------------------------------------------------------------------
// Cooldown + dedupe
// ---------------------------------------------------------------------------

/// Opaque reference to an external notification thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadHandle(pub String);

impl std::fmt::Display for ThreadHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Store key for a device: one open incident per device.
pub fn cooldown_key(device_id: &str) -> String {
  format!("alert:{}", device_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooldownEntry {
  pub key: String,
  pub device_id: String,
  pub incident_id: String,
  /// `None` until the messaging collaborator returns a thread.
  pub thread_handle: Option<ThreadHandle>,
  pub opened_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub cooldown_secs: u64,
  pub hit_count: u32,
  pub last_hit_at: DateTime<Utc>,
}

impl CooldownEntry {
  pub fn is_live(&self, now: DateTime<Utc>) -> bool {
    now < self.expires_at
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupeOutcome {
  NewAlert,
  /// Folded into the open incident without any outbound message.
  CooldownActive,
  /// Folded into the open incident and routed as a reply.
  ThreadUpdate,
  /// No open incident and probability under the device threshold.
  BelowThreshold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupeDecision {
  pub event_replay_id: u64,
  pub device_id: String,
  pub outcome: DedupeOutcome,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub incident_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub thread_handle: Option<ThreadHandle>,
  /// Events absorbed by the incident so far (0 when no incident).
  pub hit_count: u32,
}

impl DedupeDecision {
  pub fn was_deduplicated(&self) -> bool {
    matches!(
      self.outcome,
      DedupeOutcome::CooldownActive | DedupeOutcome::ThreadUpdate
    )
  }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
  ThreadCreated,
  Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationResult {
  pub kind: NotificationKind,
  pub channel: String,
  pub thread_handle: ThreadHandle,
  pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
  CreateCase,
  OrderParts,
  AssignTech,
  Escalate,
  Notify,
}

impl ActionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::CreateCase => "CREATE_CASE",
      Self::OrderParts => "ORDER_PARTS",
      Self::AssignTech => "ASSIGN_TECH",
      Self::Escalate => "ESCALATE",
      Self::Notify => "NOTIFY",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
  Pending,
  Executed,
  Failed,
}

impl ActionStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "PENDING",
      Self::Executed => "EXECUTED",
      Self::Failed => "FAILED",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTrigger {
  PredictedFailure,
  WorkOrderCreated,
  ElevatedRisk,
  InsufficientStock,
  UnacknowledgedCritical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationAction {
  pub id: String,
  pub kind: ActionKind,
  pub trigger: ActionTrigger,
  pub device_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub incident_id: Option<String>,
  pub status: ActionStatus,
  pub details: serde_json::Map<String, serde_json::Value>,
  pub executed_by: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  pub timestamp: DateTime<Utc>,
}

/// Part line for a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRequest {
  #[serde(alias = "partId")]
  pub part_id: String,
  pub quantity: u32,
}

/// Work order handed to the ticketing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkOrderSpec {
  pub device_id: String,
  pub incident_id: Option<String>,
  pub equipment_type: String,
  pub priority: Priority,
  pub subject: String,
  pub description: String,
  pub failure_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technician {
  pub id: String,
  pub name: String,
  pub specializations: Vec<String>,
  #[serde(default = "default_true")]
  pub available: bool,
  #[serde(default)]
  pub workload: u32,
  #[serde(default)]
  pub rating: f64,
}

fn default_true() -> bool {
  true
}

// ---------------------------------------------------------------------------
// Escalation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationState {
  Armed,
  Acknowledged,
  Fired,
  Closed,
}

impl EscalationState {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Armed)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Armed => "ARMED",
      Self::Acknowledged => "ACKNOWLEDGED",
      Self::Fired => "FIRED",
      Self::Closed => "CLOSED",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationTimer {
  pub device_id: String,
  pub incident_id: String,
  pub armed_at: DateTime<Utc>,
  pub fire_at: DateTime<Utc>,
  pub cancelled: bool,
  pub state: EscalationState,
  /// Incident version token compared at fire time.
  pub version: u64,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
  pub sequence: u64,
  pub event_id: String,
  pub entity_type: String,
  pub entity_id: String,
  pub action: String,
  pub performed_by: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous_state: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub new_state: Option<serde_json::Value>,
  pub previous_hash: String,
  pub hash: String,
  #[serde(default)]
  pub verified: bool,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetricsWindow {
  /// Bucket key "YYYY-MM-DD".
  pub date: String,
  pub events_received: u64,
  pub events_processed: u64,
  pub events_deduplicated: u64,
  pub work_orders_created: u64,
  pub alerts_sent: u64,
  pub thread_updates: u64,
  pub avg_processing_time_ms: f64,
  pub failure_rate: f64,
  pub false_positive_rate: f64,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract: what the binaries emit)
// ---------------------------------------------------------------------------

/// Everything the pipeline did for one accepted event.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
  pub decision: DedupeDecision,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notification: Option<NotificationResult>,
  pub actions: Vec<AutomationAction>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub escalation: Option<EscalationTimer>,
}

/// Structured error output for rejected input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sensor_type_loose_parsing() {
    assert_eq!(SensorType::from_str_loose("Temperature"), Some(SensorType::Temperature));
    assert_eq!(SensorType::from_str_loose(" RPM "), Some(SensorType::Rpm));
    assert_eq!(SensorType::from_str_loose("humidity"), None);
  }

  #[test]
  fn raw_event_accepts_camel_and_snake_keys() {
    let camel: RawEvent = serde_json::from_str(
      r#"{"deviceId":"EQ-001","timestamp":"2026-01-01T08:00:00Z","sensorType":"Temperature","failureProbability":0.92,"replayId":1001}"#,
    )
    .unwrap();
    let snake: RawEvent = serde_json::from_str(
      r#"{"device_id":"EQ-001","createdDate":"2026-01-01T08:00:00Z","sensor_type":"Temperature","failure_probability":0.92,"replay_id":1001,"extra":true}"#,
    )
    .unwrap();
    assert_eq!(camel.device_id, snake.device_id);
    assert_eq!(camel.replay_id, snake.replay_id);
    assert!(camel.payload.is_null());
  }

  #[test]
  fn decision_outcome_serializes_screaming_snake() {
    let json = serde_json::to_string(&DedupeOutcome::ThreadUpdate).unwrap();
    assert_eq!(json, "\"THREAD_UPDATE\"");
  }
}
