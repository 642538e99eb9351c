//! HTTP handlers for the alert service.

use axum::{
  extract::{rejection::JsonRejection, Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use std::sync::Arc;

use alert_engine::metrics::day_bucket;
use alert_engine::types::{ErrorOutput, PipelineMetricsWindow, RawEvent};
use alert_engine::{EngineError, IncidentClosure};

use crate::date;
use crate::state::AppState;
use crate::types::*;

/// Engine error mapped onto an HTTP status with an `ErrorOutput` body.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    Self(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
      EngineError::StaleEvent { .. } => StatusCode::CONFLICT,
      EngineError::DeviceHalted { .. } => StatusCode::LOCKED,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = match &self.0 {
      EngineError::Validation { field, reason } => {
        ErrorOutput::new(reason.clone()).with_field(field.clone())
      }
      e => ErrorOutput::new(e.to_string()),
    };
    if status.is_server_error() {
      tracing::error!(error = %self.0, "request failed");
    }
    (status, Json(body)).into_response()
  }
}

fn bad_request(message: impl Into<String>) -> Response {
  (StatusCode::BAD_REQUEST, Json(ErrorOutput::new(message))).into_response()
}

pub async fn health() -> &'static str {
  "ok"
}

pub async fn ingest(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<RawEvent>, JsonRejection>,
) -> Response {
  let Json(raw) = match payload {
    Ok(p) => p,
    Err(e) => {
      state.engine.metrics().record_received(chrono::Utc::now());
      tracing::warn!(error = %e, "ingest: malformed event body");
      return bad_request(format!("json parse: {}", e.body_text()));
    }
  };

  match state.engine.process(&raw).await {
    Ok(outcome) => Json(outcome).into_response(),
    Err(e) => ApiError(e).into_response(),
  }
}

pub async fn acknowledge(
  State(state): State<Arc<AppState>>,
  Path(device_id): Path<String>,
  Json(req): Json<AckRequest>,
) -> Result<Json<AckResponse>, ApiError> {
  let escalation = state.engine.acknowledge(&device_id, &req.performed_by).await?;
  Ok(Json(AckResponse {
    acknowledged: escalation.is_some(),
    escalation: escalation.or_else(|| state.engine.escalation(&device_id)),
    device_id: alert_engine::normalize::canonical_device_id(&device_id),
  }))
}

pub async fn close(
  State(state): State<Arc<AppState>>,
  Path(device_id): Path<String>,
  Json(req): Json<CloseRequest>,
) -> Result<Json<IncidentClosure>, ApiError> {
  let closure = state
    .engine
    .close_incident(&device_id, &req.performed_by, req.resolution)
    .await?;
  Ok(Json(closure))
}

pub async fn technician_availability(
  State(state): State<Arc<AppState>>,
  payload: Option<Json<AvailabilityRequest>>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
  let req = payload.map(|Json(r)| r).unwrap_or_default();
  if let Some(id) = &req.technician_id {
    let mut known = true;
    if let Some(available) = req.available {
      known &= state.directory.set_available(id, available);
    }
    if let Some(workload) = req.workload {
      known &= state.directory.set_workload(id, workload);
    }
    if !known {
      tracing::warn!(technician_id = %id, "availability update for unknown technician");
    }
  }

  let actions = state.engine.technician_availability_changed().await?;
  Ok(Json(AvailabilityResponse {
    resolved: actions.len(),
    actions,
  }))
}

pub async fn metrics_today(State(state): State<Arc<AppState>>) -> Json<PipelineMetricsWindow> {
  let today = day_bucket(&chrono::Utc::now());
  Json(state.engine.metrics().snapshot(&today))
}

pub async fn metrics_for_date(
  State(state): State<Arc<AppState>>,
  Path(raw_date): Path<String>,
) -> Response {
  match date::parse_bucket_date(&raw_date) {
    Some(d) => Json(state.engine.metrics().snapshot(&d)).into_response(),
    None => bad_request(format!("invalid date: {}", raw_date)),
  }
}

pub async fn verify_audit(State(state): State<Arc<AppState>>) -> Json<VerifyResponse> {
  let valid = match state.engine.verify_audit() {
    Ok(()) => true,
    Err(e) => {
      tracing::error!(error = %e, "audit verification failed");
      false
    }
  };
  Json(VerifyResponse {
    valid,
    records: state.engine.audit().len(),
  })
}
