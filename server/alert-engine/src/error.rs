//! Structured error types for the alert engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("stale event for {device_id}: replay_id {replay_id} <= last seen {last_seen}")]
  StaleEvent {
    device_id: String,
    replay_id: u64,
    last_seen: u64,
  },

  #[error("cooldown entry already open for {device_id}")]
  AlreadyOpen { device_id: String },

  #[error("no open cooldown entry for {device_id}")]
  NotOpen { device_id: String },

  #[error("delivery failed after {attempts} attempts: {reason}")]
  Delivery { attempts: u32, reason: String },

  #[error("no technician available for {specialization}")]
  NoTechnicianAvailable { specialization: String },

  #[error("insufficient stock for {part_id}: requested {requested}, available {available}")]
  InsufficientStock {
    part_id: String,
    requested: u32,
    available: u32,
  },

  #[error("audit chain integrity violated at record {index}")]
  ChainIntegrity { index: usize },

  #[error("device {device_id} halted after a fatal error")]
  DeviceHalted { device_id: String },

  #[error("collaborator: {0}")]
  Collaborator(String),

  #[error("config: {0}")]
  Config(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn config(msg: impl Into<String>) -> Self {
    Self::Config(msg.into())
  }

  /// Errors that leave cooldown or audit state unknown. Processing for the
  /// affected key stops when one of these surfaces.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      Self::AlreadyOpen { .. }
        | Self::NotOpen { .. }
        | Self::ChainIntegrity { .. }
        | Self::DeviceHalted { .. }
    )
  }
}

/// Failure reported by the messaging collaborator for a single attempt.
#[derive(Debug, Clone, Error)]
#[error("delivery: {0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
  pub fn new(msg: impl Into<String>) -> Self {
    Self(msg.into())
  }
}

/// Failure reported by the work-order/ticketing collaborator.
#[derive(Debug, Clone, Error)]
pub enum WorkOrderError {
  #[error("insufficient stock for {part_id}: requested {requested}, available {available}")]
  InsufficientStock {
    part_id: String,
    requested: u32,
    available: u32,
  },

  #[error("ticketing unavailable: {0}")]
  Unavailable(String),
}

impl From<WorkOrderError> for EngineError {
  fn from(e: WorkOrderError) -> Self {
    match e {
      WorkOrderError::InsufficientStock {
        part_id,
        requested,
        available,
      } => Self::InsufficientStock {
        part_id,
        requested,
        available,
      },
      WorkOrderError::Unavailable(msg) => Self::Collaborator(msg),
    }
  }
}
