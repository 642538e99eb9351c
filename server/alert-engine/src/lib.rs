//! Failure-alert deduplication and escalation engine.
//!
//! Ingests per-device failure-probability events, folds repeats into one
//! open incident per device (cooldown window), routes threaded notifications,
//! triggers maintenance automation, arms cancellable escalations for critical
//! incidents, and records every transition in a hash-chained audit ledger.
//!
//! In-memory state only; external systems sit behind the traits in
//! [`collaborators`].

pub mod audit;
pub mod automation;
pub mod collaborators;
pub mod config;
pub mod cooldown;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod fingerprint;
pub mod locks;
pub mod matching;
pub mod metrics;
pub mod normalize;
pub mod notify;
pub mod types;

pub use collaborators::Collaborators;
pub use config::{Config, RoutingTable};
pub use engine::{Engine, IncidentClosure};
pub use error::EngineError;
pub use types::{ProcessOutcome, RawEvent};
