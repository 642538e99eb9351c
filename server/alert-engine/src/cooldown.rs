//! Cooldown store: keyed, time-expiring record of in-flight incidents.
//!
//! At most one live entry per device key. Expired entries behave as absent;
//! they are removed lazily on lookup or by `sweep`. Every mutation is audited
//! before it is applied, so a refused append leaves the store unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::{AuditEntry, AuditLedger, EntityType};
use crate::error::EngineError;
use crate::fingerprint;
use crate::types::{cooldown_key, CooldownEntry, ThreadHandle};

pub struct CooldownStore {
  entries: Mutex<HashMap<String, CooldownEntry>>,
  /// Incidents opened so far; feeds the incident id.
  opened: AtomicU64,
  audit: Arc<AuditLedger>,
  actor: String,
}

impl CooldownStore {
  pub fn new(audit: Arc<AuditLedger>, actor: impl Into<String>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      opened: AtomicU64::new(0),
      audit,
      actor: actor.into(),
    }
  }

  /// Live entry for the device at `now`, if any.
  pub fn lookup(
    &self,
    device_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<CooldownEntry>, EngineError> {
    let mut entries = self.lock();
    let key = cooldown_key(device_id);
    self.expire_if_stale(&mut entries, &key, now)?;
    Ok(entries.get(&key).cloned())
  }

  /// Open a fresh incident window. Callers must `lookup` first.
  pub fn open(
    &self,
    event_id: &str,
    device_id: &str,
    now: DateTime<Utc>,
    duration: Duration,
  ) -> Result<CooldownEntry, EngineError> {
    let mut entries = self.lock();
    let key = cooldown_key(device_id);
    self.expire_if_stale(&mut entries, &key, now)?;
    if entries.contains_key(&key) {
      return Err(EngineError::AlreadyOpen {
        device_id: device_id.to_string(),
      });
    }

    let sequence = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
    let entry = CooldownEntry {
      key: key.clone(),
      device_id: device_id.to_string(),
      incident_id: fingerprint::incident_id(device_id, &now, sequence),
      thread_handle: None,
      opened_at: now,
      expires_at: now + to_chrono(duration),
      cooldown_secs: duration.as_secs(),
      hit_count: 1,
      last_hit_at: now,
    };
    self.audit.append(
      AuditEntry::new(event_id, EntityType::CooldownEntry, &key, "OPEN")
        .by(&self.actor)
        .after(snapshot(&entry)),
    )?;
    entries.insert(key, entry.clone());
    Ok(entry)
  }

  /// Extend the window from `now` and count the absorbed event.
  pub fn refresh(
    &self,
    event_id: &str,
    device_id: &str,
    now: DateTime<Utc>,
    duration: Duration,
  ) -> Result<CooldownEntry, EngineError> {
    let mut entries = self.lock();
    let key = cooldown_key(device_id);
    self.expire_if_stale(&mut entries, &key, now)?;
    let current = entries.get(&key).cloned().ok_or_else(|| EngineError::NotOpen {
      device_id: device_id.to_string(),
    })?;

    let mut updated = current.clone();
    updated.hit_count = updated.hit_count.saturating_add(1);
    updated.last_hit_at = now;
    updated.expires_at = updated.expires_at.max(now + to_chrono(duration));
    updated.cooldown_secs = duration.as_secs();

    self.audit.append(
      AuditEntry::new(event_id, EntityType::CooldownEntry, &key, "REFRESH")
        .by(&self.actor)
        .before(snapshot(&current))
        .after(snapshot(&updated)),
    )?;
    entries.insert(key, updated.clone());
    Ok(updated)
  }

  /// Record the thread returned by the messaging collaborator. Ignored when
  /// the entry has since been closed or replaced by another incident.
  pub fn attach_thread(
    &self,
    event_id: &str,
    device_id: &str,
    incident_id: &str,
    handle: ThreadHandle,
  ) -> Result<Option<CooldownEntry>, EngineError> {
    let mut entries = self.lock();
    let key = cooldown_key(device_id);
    let current = match entries.get(&key) {
      Some(e) if e.incident_id == incident_id => e.clone(),
      _ => return Ok(None),
    };

    let mut updated = current.clone();
    updated.thread_handle = Some(handle);
    self.audit.append(
      AuditEntry::new(event_id, EntityType::CooldownEntry, &key, "ATTACH_THREAD")
        .by(&self.actor)
        .before(snapshot(&current))
        .after(snapshot(&updated)),
    )?;
    entries.insert(key, updated.clone());
    Ok(Some(updated))
  }

  /// Close the device's incident window. Idempotent.
  pub fn close(
    &self,
    event_id: &str,
    device_id: &str,
    actor: &str,
  ) -> Result<Option<CooldownEntry>, EngineError> {
    let mut entries = self.lock();
    let key = cooldown_key(device_id);
    let current = match entries.get(&key) {
      Some(e) => e.clone(),
      None => return Ok(None),
    };
    self.audit.append(
      AuditEntry::new(event_id, EntityType::CooldownEntry, &key, "CLOSE")
        .by(actor)
        .before(snapshot(&current)),
    )?;
    entries.remove(&key);
    Ok(Some(current))
  }

  /// Remove every entry expired at `now`.
  pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<CooldownEntry>, EngineError> {
    let mut entries = self.lock();
    let mut expired: Vec<String> = entries
      .values()
      .filter(|e| !e.is_live(now))
      .map(|e| e.key.clone())
      .collect();
    expired.sort();

    let mut removed = Vec::with_capacity(expired.len());
    for key in expired {
      if let Some(entry) = self.expire_if_stale(&mut entries, &key, now)? {
        removed.push(entry);
      }
    }
    Ok(removed)
  }

  /// Number of live entries at `now`.
  pub fn open_count(&self, now: DateTime<Utc>) -> usize {
    self.lock().values().filter(|e| e.is_live(now)).count()
  }

  fn expire_if_stale(
    &self,
    entries: &mut HashMap<String, CooldownEntry>,
    key: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<CooldownEntry>, EngineError> {
    match entries.get(key) {
      Some(e) if !e.is_live(now) => {
        let entry = e.clone();
        self.audit.append(
          AuditEntry::new(&entry.incident_id, EntityType::CooldownEntry, key, "EXPIRE")
            .by(&self.actor)
            .before(snapshot(&entry)),
        )?;
        entries.remove(key);
        tracing::debug!(device_id = %entry.device_id, hit_count = entry.hit_count, "cooldown expired");
        Ok(Some(entry))
      }
      _ => Ok(None),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CooldownEntry>> {
    self.entries.lock().unwrap_or_else(|p| p.into_inner())
  }
}

fn to_chrono(d: Duration) -> chrono::Duration {
  chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}

fn snapshot(entry: &CooldownEntry) -> serde_json::Value {
  json!({
    "incidentId": entry.incident_id,
    "threadHandle": entry.thread_handle,
    "expiresAt": entry.expires_at.to_rfc3339(),
    "hitCount": entry.hit_count,
    "lastHitAt": entry.last_hit_at.to_rfc3339(),
  })
}
