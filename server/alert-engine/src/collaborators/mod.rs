//! Narrow interfaces to the external systems the pipeline drives.
//!
//! Wire formats of concrete chat/ticketing APIs live behind these traits.
//! [`memory`] holds in-process implementations used by the binaries and tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DeliveryError, WorkOrderError};
use crate::types::{PartRequest, Resolution, Technician, ThreadHandle, WorkOrderSpec};

/// Messaging collaborator (chat threads). Both calls may fail transiently.
#[async_trait]
pub trait Messenger: Send + Sync {
  async fn create_thread(&self, channel: &str, message: &str) -> Result<ThreadHandle, DeliveryError>;

  async fn reply(&self, thread: &ThreadHandle, message: &str) -> Result<(), DeliveryError>;
}

/// Work-order / ticketing collaborator.
#[async_trait]
pub trait WorkOrders: Send + Sync {
  async fn create_work_order(&self, spec: &WorkOrderSpec) -> Result<String, WorkOrderError>;

  /// Reserve every line or none of them.
  async fn reserve_parts(&self, parts: &[PartRequest]) -> Result<String, WorkOrderError>;

  async fn assign_technician(
    &self,
    work_order_id: &str,
    technician_id: &str,
  ) -> Result<(), WorkOrderError>;

  /// Close the work order with the incident's resolution.
  async fn close_work_order(
    &self,
    work_order_id: &str,
    resolution: Resolution,
  ) -> Result<(), WorkOrderError>;
}

/// Technician directory collaborator.
#[async_trait]
pub trait TechnicianDirectory: Send + Sync {
  /// Technicians currently free to take work. May include technicians whose
  /// specialization does not match; ranking happens in the orchestrator.
  async fn list_available(&self, specialization: &str) -> Result<Vec<Technician>, WorkOrderError>;
}

/// The external systems an engine drives.
#[derive(Clone)]
pub struct Collaborators {
  pub messenger: Arc<dyn Messenger>,
  pub work_orders: Arc<dyn WorkOrders>,
  pub directory: Arc<dyn TechnicianDirectory>,
}
