//! Append-only, hash-chained audit ledger.
//!
//! Each record's hash is blake3 over its canonical fields followed by the
//! previous record's hash, so altering any stored record breaks every hash
//! after it. The ledger owns the chain; callers only ever append.

use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::error::EngineError;
use crate::types::AuditRecord;

/// Hash preceding the first record.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
  CooldownEntry,
  Notification,
  AutomationAction,
  Escalation,
  WorkOrder,
}

impl EntityType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::CooldownEntry => "CooldownEntry",
      Self::Notification => "Notification",
      Self::AutomationAction => "AutomationAction",
      Self::WorkOrder => "WorkOrder",
      Self::Escalation => "Escalation",
    }
  }
}

/// A transition to be recorded; the ledger assigns sequence, time and hashes.
#[derive(Debug, Clone)]
pub struct AuditEntry {
  pub event_id: String,
  pub entity_type: EntityType,
  pub entity_id: String,
  pub action: String,
  pub performed_by: String,
  pub previous_state: Option<Value>,
  pub new_state: Option<Value>,
}

impl AuditEntry {
  pub fn new(
    event_id: impl Into<String>,
    entity_type: EntityType,
    entity_id: impl Into<String>,
    action: impl Into<String>,
  ) -> Self {
    Self {
      event_id: event_id.into(),
      entity_type,
      entity_id: entity_id.into(),
      action: action.into(),
      performed_by: String::new(),
      previous_state: None,
      new_state: None,
    }
  }

  pub fn by(mut self, actor: impl Into<String>) -> Self {
    self.performed_by = actor.into();
    self
  }

  pub fn before(mut self, state: Value) -> Self {
    self.previous_state = Some(state);
    self
  }

  pub fn after(mut self, state: Value) -> Self {
    self.new_state = Some(state);
    self
  }
}

#[derive(Debug, Default)]
struct LedgerState {
  records: Vec<AuditRecord>,
  /// Set once verification fails; appends are refused afterwards.
  halted: bool,
}

#[derive(Debug, Default)]
pub struct AuditLedger {
  state: Mutex<LedgerState>,
}

impl AuditLedger {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a record, chaining it to the current head.
  pub fn append(&self, entry: AuditEntry) -> Result<AuditRecord, EngineError> {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    if state.halted {
      return Err(EngineError::ChainIntegrity {
        index: state.records.len(),
      });
    }

    let previous_hash = state
      .records
      .last()
      .map(|r| r.hash.clone())
      .unwrap_or_else(|| GENESIS_HASH.to_string());

    let mut record = AuditRecord {
      sequence: state.records.len() as u64 + 1,
      event_id: entry.event_id,
      entity_type: entry.entity_type.as_str().to_string(),
      entity_id: entry.entity_id,
      action: entry.action,
      performed_by: entry.performed_by,
      timestamp: Utc::now(),
      previous_state: entry.previous_state,
      new_state: entry.new_state,
      previous_hash,
      hash: String::new(),
      verified: true,
    };
    record.hash = digest(&record, &record.previous_hash);

    tracing::debug!(
      sequence = record.sequence,
      entity_type = %record.entity_type,
      entity_id = %record.entity_id,
      action = %record.action,
      "audit append"
    );
    state.records.push(record.clone());
    Ok(record)
  }

  /// Recompute every hash. Marks each record's `verified` flag; the first
  /// mismatch halts further appends.
  pub fn check_chain(&self) -> Result<(), EngineError> {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    let broken_at = first_broken(&state.records);
    for (i, record) in state.records.iter_mut().enumerate() {
      record.verified = broken_at.map_or(true, |b| i < b);
    }
    match broken_at {
      None => Ok(()),
      Some(index) => {
        state.halted = true;
        tracing::error!(index, "audit chain integrity violated; ledger halted");
        Err(EngineError::ChainIntegrity { index })
      }
    }
  }

  pub fn verify_chain(&self) -> bool {
    self.check_chain().is_ok()
  }

  /// Verify an exported copy of a chain without touching the ledger.
  pub fn verify_records(records: &[AuditRecord]) -> Result<(), EngineError> {
    match first_broken(records) {
      None => Ok(()),
      Some(index) => Err(EngineError::ChainIntegrity { index }),
    }
  }

  pub fn records(&self) -> Vec<AuditRecord> {
    let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state.records.clone()
  }

  pub fn records_for(&self, entity_id: &str) -> Vec<AuditRecord> {
    let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state
      .records
      .iter()
      .filter(|r| r.entity_id == entity_id)
      .cloned()
      .collect()
  }

  pub fn len(&self) -> usize {
    let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn head_hash(&self) -> String {
    let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state
      .records
      .last()
      .map(|r| r.hash.clone())
      .unwrap_or_else(|| GENESIS_HASH.to_string())
  }

  pub fn is_halted(&self) -> bool {
    let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state.halted
  }

  #[cfg(test)]
  pub(crate) fn force_halt(&self) {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state.halted = true;
  }
}

/// Index of the first record whose link or digest does not check out.
fn first_broken(records: &[AuditRecord]) -> Option<usize> {
  let mut previous = GENESIS_HASH.to_string();
  for (i, record) in records.iter().enumerate() {
    if record.previous_hash != previous || digest(record, &previous) != record.hash {
      return Some(i);
    }
    previous = record.hash.clone();
  }
  None
}

/// blake3 over the record's canonical fields, then the previous hash.
fn digest(record: &AuditRecord, previous_hash: &str) -> String {
  const SEP: &[u8] = b"\x1f";
  let mut hasher = blake3::Hasher::new();
  hasher.update(record.sequence.to_string().as_bytes());
  for field in [
    record.event_id.as_str(),
    record.entity_type.as_str(),
    record.entity_id.as_str(),
    record.action.as_str(),
    record.performed_by.as_str(),
  ] {
    hasher.update(SEP);
    hasher.update(field.as_bytes());
  }
  hasher.update(SEP);
  hasher.update(
    record
      .timestamp
      .to_rfc3339_opts(SecondsFormat::Nanos, true)
      .as_bytes(),
  );
  for state in [&record.previous_state, &record.new_state] {
    hasher.update(SEP);
    if let Some(v) = state {
      hasher.update(v.to_string().as_bytes());
    }
  }
  hasher.update(SEP);
  hasher.update(previous_hash.as_bytes());
  hasher.finalize().to_hex().to_string()
}
