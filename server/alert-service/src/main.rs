//! Binary entrypoint for the alert service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alert_engine::collaborators::memory::{InMemoryStack, Roster};
use alert_engine::metrics::day_bucket;
use alert_engine::{Config, Engine, RoutingTable};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alert_service::AppState;

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
  let registry = tracing_subscriber::registry().with(filter);
  if json {
    registry.with(fmt::layer().json()).init();
  } else {
    registry.with(fmt::layer()).init();
  }
}

/// Expire stale cooldown entries and log the day's metrics.
///
/// Cooldowns run on event time, so the sweep uses the latest `observed_at`
/// the engine has admitted rather than the wall clock. Backfilled history
/// keeps its windows until newer events move the clock past them.
fn spawn_sweeper(engine: Engine, every: Duration) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      interval.tick().await;
      if let Some(event_time) = engine.event_clock() {
        match engine.sweep_expired(event_time) {
          Ok(removed) if !removed.is_empty() => {
            tracing::info!(expired = removed.len(), %event_time, "cooldown entries expired")
          }
          Ok(_) => {}
          Err(e) => tracing::error!(error = %e, "cooldown sweep failed"),
        }
      }
      let now = chrono::Utc::now();
      let window = engine.metrics().snapshot(&day_bucket(&now));
      tracing::debug!(
        processed = window.events_processed,
        deduplicated = window.events_deduplicated,
        failure_rate = window.failure_rate,
        "pipeline metrics"
      );
    }
  });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // PORT and SWEEP_INTERVAL_SECS may come from .env too.
  let _ = dotenvy::dotenv();
  init_tracing();

  let config = Config::from_env()?;
  let port: u16 = std::env::var("PORT")
    .unwrap_or_else(|_| "5005".into())
    .parse()?;
  let sweep_secs: u64 = std::env::var("SWEEP_INTERVAL_SECS")
    .unwrap_or_else(|_| "30".into())
    .parse()?;

  let routing = match &config.routing_table {
    Some(path) => RoutingTable::from_file(path, &config)?,
    None => RoutingTable::empty(&config),
  };
  let roster = match &config.roster_file {
    Some(path) => Roster::from_file(path)?,
    None => Roster::default(),
  };
  let stack = InMemoryStack::from_roster(roster);
  let engine = Engine::new(config, routing, stack.collaborators());

  spawn_sweeper(engine.clone(), Duration::from_secs(sweep_secs.max(1)));

  let state = Arc::new(AppState {
    engine,
    directory: stack.directory.clone(),
  });
  let app = alert_service::router(state);

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  tracing::info!(%addr, "alert-service listening");

  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, app).await?;

  Ok(())
}
