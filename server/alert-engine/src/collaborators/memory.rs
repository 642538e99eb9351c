//! In-process collaborators: a recording messenger, a stock-tracked ticketing
//! system and a static technician roster.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{Collaborators, Messenger, TechnicianDirectory, WorkOrders};
use crate::error::{DeliveryError, EngineError, WorkOrderError};
use crate::types::{PartRequest, Resolution, Technician, ThreadHandle, WorkOrderSpec};

// ---------------------------------------------------------------------------
// Messenger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentMessage {
  pub channel: Option<String>,
  pub thread: ThreadHandle,
  pub message: String,
  pub is_reply: bool,
}

/// Records every message and logs it; never fails.
#[derive(Debug, Default)]
pub struct LoggingMessenger {
  state: Mutex<MessengerState>,
}

#[derive(Debug, Default)]
struct MessengerState {
  seq: u64,
  sent: Vec<SentMessage>,
}

impl LoggingMessenger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn sent(&self) -> Vec<SentMessage> {
    self.state.lock().unwrap_or_else(|p| p.into_inner()).sent.clone()
  }
}

#[async_trait]
impl Messenger for LoggingMessenger {
  async fn create_thread(&self, channel: &str, message: &str) -> Result<ThreadHandle, DeliveryError> {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    state.seq += 1;
    let handle = ThreadHandle(format!("{}.{:06}", Utc::now().timestamp(), state.seq));
    tracing::info!(channel, thread = %handle, message, "thread created");
    state.sent.push(SentMessage {
      channel: Some(channel.to_string()),
      thread: handle.clone(),
      message: message.to_string(),
      is_reply: false,
    });
    Ok(handle)
  }

  async fn reply(&self, thread: &ThreadHandle, message: &str) -> Result<(), DeliveryError> {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    tracing::info!(thread = %thread, message, "thread reply");
    state.sent.push(SentMessage {
      channel: None,
      thread: thread.clone(),
      message: message.to_string(),
      is_reply: true,
    });
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// Work orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkOrderRecord {
  pub id: String,
  pub spec: WorkOrderSpec,
  pub technician_id: Option<String>,
  /// Set once the work order is closed.
  pub resolution: Option<Resolution>,
}

#[derive(Debug, Default)]
struct TicketingState {
  stock: HashMap<String, u32>,
  work_orders: Vec<WorkOrderRecord>,
  reservations: Vec<(String, Vec<PartRequest>)>,
}

/// Ticketing system with an inventory; reservations are all-or-nothing.
#[derive(Debug, Default)]
pub struct InMemoryWorkOrders {
  state: Mutex<TicketingState>,
}

impl InMemoryWorkOrders {
  pub fn new(stock: HashMap<String, u32>) -> Self {
    Self {
      state: Mutex::new(TicketingState {
        stock,
        ..TicketingState::default()
      }),
    }
  }

  pub fn work_orders(&self) -> Vec<WorkOrderRecord> {
    self.lock().work_orders.clone()
  }

  pub fn stock(&self, part_id: &str) -> u32 {
    self.lock().stock.get(part_id).copied().unwrap_or(0)
  }

  pub fn reservation_count(&self) -> usize {
    self.lock().reservations.len()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, TicketingState> {
    self.state.lock().unwrap_or_else(|p| p.into_inner())
  }
}

#[async_trait]
impl WorkOrders for InMemoryWorkOrders {
  async fn create_work_order(&self, spec: &WorkOrderSpec) -> Result<String, WorkOrderError> {
    let mut state = self.lock();
    let id = format!("WO-{:04}", state.work_orders.len() + 1);
    state.work_orders.push(WorkOrderRecord {
      id: id.clone(),
      spec: spec.clone(),
      technician_id: None,
      resolution: None,
    });
    tracing::info!(work_order_id = %id, device_id = %spec.device_id, "work order created");
    Ok(id)
  }

  async fn reserve_parts(&self, parts: &[PartRequest]) -> Result<String, WorkOrderError> {
    let mut state = self.lock();
    // Check every line before touching stock.
    for line in parts {
      let available = state.stock.get(&line.part_id).copied().unwrap_or(0);
      if available < line.quantity {
        return Err(WorkOrderError::InsufficientStock {
          part_id: line.part_id.clone(),
          requested: line.quantity,
          available,
        });
      }
    }
    for line in parts {
      if let Some(on_hand) = state.stock.get_mut(&line.part_id) {
        *on_hand -= line.quantity;
      }
    }
    let id = format!("RES-{:04}", state.reservations.len() + 1);
    state.reservations.push((id.clone(), parts.to_vec()));
    Ok(id)
  }

  async fn assign_technician(
    &self,
    work_order_id: &str,
    technician_id: &str,
  ) -> Result<(), WorkOrderError> {
    let mut state = self.lock();
    let order = find_order(&mut state, work_order_id)?;
    if order.resolution.is_some() {
      return Err(WorkOrderError::Unavailable(format!(
        "work order {} is closed",
        work_order_id
      )));
    }
    order.technician_id = Some(technician_id.to_string());
    Ok(())
  }

  async fn close_work_order(
    &self,
    work_order_id: &str,
    resolution: Resolution,
  ) -> Result<(), WorkOrderError> {
    let mut state = self.lock();
    let order = find_order(&mut state, work_order_id)?;
    order.resolution = Some(resolution);
    tracing::info!(work_order_id, ?resolution, "work order closed");
    Ok(())
  }
}

fn find_order<'a>(
  state: &'a mut TicketingState,
  work_order_id: &str,
) -> Result<&'a mut WorkOrderRecord, WorkOrderError> {
  state
    .work_orders
    .iter_mut()
    .find(|w| w.id == work_order_id)
    .ok_or_else(|| WorkOrderError::Unavailable(format!("unknown work order {}", work_order_id)))
}

// ---------------------------------------------------------------------------
// Technician directory
// ---------------------------------------------------------------------------

/// Fixed roster whose availability and workload can be toggled.
#[derive(Debug, Default)]
pub struct StaticTechnicianDirectory {
  roster: Mutex<Vec<Technician>>,
}

impl StaticTechnicianDirectory {
  pub fn new(roster: Vec<Technician>) -> Self {
    Self {
      roster: Mutex::new(roster),
    }
  }

  pub fn set_available(&self, technician_id: &str, available: bool) -> bool {
    self.update(technician_id, |t| t.available = available)
  }

  pub fn set_workload(&self, technician_id: &str, workload: u32) -> bool {
    self.update(technician_id, |t| t.workload = workload)
  }

  fn update(&self, technician_id: &str, f: impl FnOnce(&mut Technician)) -> bool {
    let mut roster = self.roster.lock().unwrap_or_else(|p| p.into_inner());
    match roster.iter_mut().find(|t| t.id == technician_id) {
      Some(t) => {
        f(t);
        true
      }
      None => false,
    }
  }
}

#[async_trait]
impl TechnicianDirectory for StaticTechnicianDirectory {
  async fn list_available(&self, _specialization: &str) -> Result<Vec<Technician>, WorkOrderError> {
    let roster = self.roster.lock().unwrap_or_else(|p| p.into_inner());
    let mut available: Vec<Technician> = roster.iter().filter(|t| t.available).cloned().collect();
    available.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(available)
  }
}

// ---------------------------------------------------------------------------
// Roster file
// ---------------------------------------------------------------------------

/// Seed data for the in-memory collaborators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Roster {
  #[serde(default)]
  pub technicians: Vec<Technician>,
  /// part id -> units on hand.
  #[serde(default)]
  pub inventory: HashMap<String, u32>,
}

impl Roster {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
  }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Concrete handles to the in-memory collaborators, kept so callers can
/// inspect them or toggle technician availability.
#[derive(Debug, Clone)]
pub struct InMemoryStack {
  pub messenger: Arc<LoggingMessenger>,
  pub work_orders: Arc<InMemoryWorkOrders>,
  pub directory: Arc<StaticTechnicianDirectory>,
}

impl InMemoryStack {
  pub fn from_roster(roster: Roster) -> Self {
    Self {
      messenger: Arc::new(LoggingMessenger::new()),
      work_orders: Arc::new(InMemoryWorkOrders::new(roster.inventory)),
      directory: Arc::new(StaticTechnicianDirectory::new(roster.technicians)),
    }
  }

  pub fn collaborators(&self) -> Collaborators {
    Collaborators {
      messenger: self.messenger.clone(),
      work_orders: self.work_orders.clone(),
      directory: self.directory.clone(),
    }
  }
}
