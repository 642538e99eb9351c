//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is a RawEvent. Each line produces exactly one output line:
//! - A ProcessOutcome (decision, notification, actions, escalation)
//! - An ErrorOutput (parse, validation, stale or fatal error)
//!
//! Logs go to stderr. At EOF the day's metrics and the audit-chain check are
//! logged.

use std::io::Write;

use alert_engine::collaborators::memory::{InMemoryStack, Roster};
use alert_engine::metrics::day_bucket;
use alert_engine::types::ErrorOutput;
use alert_engine::{Config, Engine, EngineError, RawEvent, RoutingTable};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
  let registry = tracing_subscriber::registry().with(filter);
  if json {
    registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
  } else {
    registry.with(fmt::layer().with_writer(std::io::stderr)).init();
  }
}

fn build_engine() -> Result<Engine, EngineError> {
  let config = Config::from_env()?;
  let routing = match &config.routing_table {
    Some(path) => RoutingTable::from_file(path, &config)?,
    None => RoutingTable::empty(&config),
  };
  let roster = match &config.roster_file {
    Some(path) => Roster::from_file(path)?,
    None => Roster::default(),
  };
  tracing::info!(
    devices = routing.len(),
    technicians = roster.technicians.len(),
    "alert engine configured"
  );
  let stack = InMemoryStack::from_roster(roster);
  Ok(Engine::new(config, routing, stack.collaborators()))
}

fn error_output(e: &EngineError) -> ErrorOutput {
  match e {
    EngineError::Validation { field, reason } => {
      ErrorOutput::new(reason.clone()).with_field(field.clone())
    }
    _ => ErrorOutput::new(e.to_string()),
  }
}

fn emit<T: serde::Serialize>(out: &mut impl Write, value: &T) {
  let _ = serde_json::to_writer(&mut *out, value);
  let _ = writeln!(out);
}

#[tokio::main]
async fn main() {
  init_tracing();
  let engine = match build_engine() {
    Ok(e) => e,
    Err(e) => {
      tracing::error!(error = %e, "startup failed");
      std::process::exit(2);
    }
  };

  let stdout = std::io::stdout();
  let mut out = std::io::BufWriter::new(stdout.lock());
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    let line = match lines.next_line().await {
      Ok(Some(l)) => l,
      Ok(None) => break,
      Err(e) => {
        tracing::error!(error = %e, "read error");
        std::process::exit(1);
      }
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let raw: RawEvent = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        engine.metrics().record_received(chrono::Utc::now());
        emit(&mut out, &ErrorOutput::new(format!("json parse: {}", e)));
        continue;
      }
    };

    match engine.process(&raw).await {
      Ok(outcome) => emit(&mut out, &outcome),
      Err(e) => emit(&mut out, &error_output(&e)),
    }
  }
  let _ = out.flush();

  let today = day_bucket(&chrono::Utc::now());
  let window = engine.metrics().snapshot(&today);
  tracing::info!(
    received = window.events_received,
    processed = window.events_processed,
    deduplicated = window.events_deduplicated,
    alerts_sent = window.alerts_sent,
    work_orders = window.work_orders_created,
    failure_rate = window.failure_rate,
    "pipeline metrics"
  );
  match engine.verify_audit() {
    Ok(()) => tracing::info!(records = engine.audit().len(), "audit chain verified"),
    Err(e) => tracing::error!(error = %e, "audit chain verification failed"),
  }
}
