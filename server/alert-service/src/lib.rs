//! Alert pipeline service
//!
//! HTTP front for the alert engine: event ingest, incident acknowledgment and
//! closure, technician availability signals, daily metrics snapshots and
//! audit-chain verification. Bind to 127.0.0.1 by default (internal only).

mod date;
mod handlers;
mod state;
mod types;

use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;

pub use handlers::{
  acknowledge, close, health, ingest, metrics_for_date, metrics_today, technician_availability,
  verify_audit, ApiError,
};
pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/events", post(ingest))
    .route("/incidents/:device_id/ack", post(acknowledge))
    .route("/incidents/:device_id/close", post(close))
    .route("/technicians/availability", post(technician_availability))
    .route("/metrics", get(metrics_today))
    .route("/metrics/:date", get(metrics_for_date))
    .route("/audit/verify", get(verify_audit))
    .layer(CorsLayer::permissive())
    .with_state(state)
}
