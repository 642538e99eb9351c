//! Per-device mutual exclusion.
//!
//! One async mutex per device key, so events for different devices never
//! contend. Guards are held only across the dedupe/state-mutation step, never
//! across collaborator I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
  locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wait for exclusive access to `key`.
  pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
    let slot = {
      let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
      locks
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
    };
    slot.lock_owned().await
  }

  /// Drop slots nobody holds or waits on.
  pub fn prune(&self) -> usize {
    let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
    let before = locks.len();
    locks.retain(|_, slot| Arc::strong_count(slot) > 1);
    before - locks.len()
  }

  pub fn len(&self) -> usize {
    self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
