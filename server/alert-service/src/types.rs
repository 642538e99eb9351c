//! Request/response types for the alert service.

use alert_engine::types::{AutomationAction, EscalationTimer, Resolution};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
  #[serde(alias = "performed_by")]
  pub performed_by: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
  pub device_id: String,
  pub acknowledged: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub escalation: Option<EscalationTimer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
  #[serde(alias = "performed_by")]
  pub performed_by: String,
  pub resolution: Resolution,
}

/// Optional roster change applied before pending assignments are retried.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
  #[serde(default, alias = "technician_id")]
  pub technician_id: Option<String>,
  #[serde(default)]
  pub available: Option<bool>,
  #[serde(default)]
  pub workload: Option<u32>,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
  pub resolved: usize,
  pub actions: Vec<AutomationAction>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
  pub valid: bool,
  pub records: usize,
}
