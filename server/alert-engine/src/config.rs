//! Engine configuration with sane defaults, plus the per-device routing table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::types::{PartRequest, Priority};

/// Longest escalation delay a policy may configure (one week).
pub const MAX_ESCALATION_DELAY_MINUTES: u64 = 7 * 24 * 60;

/// Tunable thresholds and policies for the pipeline.
#[derive(Debug, Clone)]
pub struct Config {
  /// Minimum failure probability that opens an incident (inclusive).
  pub alert_threshold: f64,
  /// Probability at or above which an incident is critical (inclusive).
  pub critical_threshold: f64,
  /// Cooldown window opened or extended per incident event.
  pub cooldown: Duration,
  /// Delivery attempts per outbound message, including the first.
  pub delivery_max_attempts: u32,
  /// First retry delay; doubled on each subsequent retry.
  pub delivery_base_delay: Duration,
  /// Channel used for devices missing from the routing table.
  pub default_channel: String,
  /// Escalation delay for devices missing from the routing table.
  pub default_escalation_delay_minutes: u64,
  /// Actor identity recorded on actions and audit records.
  pub actor: String,
  /// JSON routing table; unknown devices use the fallback policy.
  pub routing_table: Option<PathBuf>,
  /// JSON roster (technicians + inventory) for the in-memory collaborators.
  pub roster_file: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      alert_threshold: 0.5,
      critical_threshold: 0.85,
      cooldown: Duration::from_secs(300),
      delivery_max_attempts: 3,
      delivery_base_delay: Duration::from_millis(250),
      default_channel: "#predictive-maintenance".into(),
      default_escalation_delay_minutes: 30,
      actor: "alert-engine".into(),
      routing_table: None,
      roster_file: None,
    }
  }
}

impl Config {
  /// Build from environment variables (a `.env` file is loaded first when present).
  /// Unset variables keep their defaults; malformed values are errors.
  pub fn from_env() -> Result<Self, EngineError> {
    let _ = dotenvy::dotenv();
    let mut config = Self::default();

    if let Some(v) = env_parse::<f64>("ALERT_THRESHOLD")? {
      config.alert_threshold = v;
    }
    if let Some(v) = env_parse::<f64>("CRITICAL_THRESHOLD")? {
      config.critical_threshold = v;
    }
    if let Some(v) = env_parse::<u64>("COOLDOWN_SECS")? {
      config.cooldown = Duration::from_secs(v);
    }
    if let Some(v) = env_parse::<u32>("DELIVERY_MAX_ATTEMPTS")? {
      config.delivery_max_attempts = v;
    }
    if let Some(v) = env_parse::<u64>("DELIVERY_BASE_DELAY_MS")? {
      config.delivery_base_delay = Duration::from_millis(v);
    }
    if let Ok(v) = std::env::var("DEFAULT_CHANNEL") {
      config.default_channel = v;
    }
    if let Some(v) = env_parse::<u64>("DEFAULT_ESCALATION_DELAY_MINUTES")? {
      config.default_escalation_delay_minutes = v;
    }
    if let Ok(v) = std::env::var("ACTOR") {
      config.actor = v;
    }
    if let Ok(v) = std::env::var("ROUTING_TABLE") {
      config.routing_table = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ROSTER_FILE") {
      config.roster_file = Some(PathBuf::from(v));
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&self.alert_threshold) {
      return Err(EngineError::config("alert_threshold must be within [0, 1]"));
    }
    if !(0.0..=1.0).contains(&self.critical_threshold) {
      return Err(EngineError::config("critical_threshold must be within [0, 1]"));
    }
    if self.critical_threshold < self.alert_threshold {
      return Err(EngineError::config(
        "critical_threshold must not be below alert_threshold",
      ));
    }
    if self.delivery_max_attempts == 0 {
      return Err(EngineError::config("delivery_max_attempts must be at least 1"));
    }
    if self.default_escalation_delay_minutes > MAX_ESCALATION_DELAY_MINUTES {
      return Err(EngineError::config(format!(
        "default_escalation_delay_minutes must not exceed {}",
        MAX_ESCALATION_DELAY_MINUTES
      )));
    }
    Ok(())
  }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, EngineError> {
  match std::env::var(name) {
    Ok(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|_| EngineError::config(format!("{} has an invalid value: {}", name, raw))),
    Err(_) => Ok(None),
  }
}

// ---------------------------------------------------------------------------
// Routing table
// ---------------------------------------------------------------------------

/// Per-device routing policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePolicy {
  pub device_id: String,
  #[serde(default = "default_equipment_type")]
  pub equipment_type: String,
  pub channel: String,
  pub priority: Priority,
  #[serde(default)]
  pub mention_users: Vec<String>,
  #[serde(default)]
  pub escalation_channel: Option<String>,
  pub escalation_delay_minutes: u64,
  /// Overrides `Config::alert_threshold` for this device.
  #[serde(default)]
  pub alert_threshold: Option<f64>,
  /// Parts reserved when a work order is raised for this device.
  #[serde(default)]
  pub parts: Vec<PartRequest>,
}

fn default_equipment_type() -> String {
  "general".into()
}

impl DevicePolicy {
  pub fn escalation_delay(&self) -> Duration {
    Duration::from_secs(self.escalation_delay_minutes.saturating_mul(60))
  }

  /// Where escalations go; falls back to the alert channel.
  pub fn escalation_target(&self) -> &str {
    self.escalation_channel.as_deref().unwrap_or(&self.channel)
  }
}

/// Device → policy table, loaded once at startup.
#[derive(Debug, Clone)]
pub struct RoutingTable {
  policies: HashMap<String, DevicePolicy>,
  fallback: DevicePolicy,
}

impl RoutingTable {
  pub fn new(policies: Vec<DevicePolicy>, config: &Config) -> Result<Self, EngineError> {
    let mut map = HashMap::with_capacity(policies.len());
    for mut policy in policies {
      policy.device_id = policy.device_id.trim().to_ascii_uppercase();
      if policy.device_id.is_empty() {
        return Err(EngineError::config("routing policy with empty deviceId"));
      }
      if let Some(t) = policy.alert_threshold {
        if !(0.0..=1.0).contains(&t) {
          return Err(EngineError::config(format!(
            "alertThreshold for {} must be within [0, 1]",
            policy.device_id
          )));
        }
      }
      if policy.escalation_delay_minutes > MAX_ESCALATION_DELAY_MINUTES {
        return Err(EngineError::config(format!(
          "escalationDelayMinutes for {} must not exceed {}",
          policy.device_id, MAX_ESCALATION_DELAY_MINUTES
        )));
      }
      if map.insert(policy.device_id.clone(), policy).is_some() {
        return Err(EngineError::config("duplicate deviceId in routing table"));
      }
    }
    Ok(Self {
      policies: map,
      fallback: fallback_policy(config),
    })
  }

  /// Table with no device-specific policies.
  pub fn empty(config: &Config) -> Self {
    Self {
      policies: HashMap::new(),
      fallback: fallback_policy(config),
    }
  }

  pub fn from_json_str(json: &str, config: &Config) -> Result<Self, EngineError> {
    let policies: Vec<DevicePolicy> = serde_json::from_str(json)?;
    Self::new(policies, config)
  }

  pub fn from_file(path: impl AsRef<Path>, config: &Config) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_json_str(&raw, config)
  }

  /// Policy for a canonical device id (fallback when unknown).
  pub fn policy(&self, device_id: &str) -> &DevicePolicy {
    self.policies.get(device_id).unwrap_or(&self.fallback)
  }

  pub fn len(&self) -> usize {
    self.policies.len()
  }

  pub fn is_empty(&self) -> bool {
    self.policies.is_empty()
  }
}

fn fallback_policy(config: &Config) -> DevicePolicy {
  DevicePolicy {
    device_id: "*".into(),
    equipment_type: default_equipment_type(),
    channel: config.default_channel.clone(),
    priority: Priority::Medium,
    mention_users: Vec::new(),
    escalation_channel: None,
    escalation_delay_minutes: config.default_escalation_delay_minutes,
    alert_threshold: None,
    parts: Vec::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TABLE: &str = r##"[
    {"deviceId": "EQ-001-ACME", "equipmentType": "pump", "channel": "#maintenance-line3", "priority": "critical",
     "mentionUsers": ["@john.smith", "@sarah.williams"], "escalationChannel": "#plant-managers",
     "escalationDelayMinutes": 15, "parts": [{"part_id": "part-002", "quantity": 1}]},
    {"deviceId": "eq-004-acme", "channel": "#maintenance-line1", "priority": "high",
     "escalationDelayMinutes": 30, "alertThreshold": 0.6}
  ]"##;

  #[test]
  fn loads_policies_and_canonicalizes_ids() {
    let config = Config::default();
    let table = RoutingTable::from_json_str(TABLE, &config).unwrap();
    assert_eq!(table.len(), 2);
    let p = table.policy("EQ-004-ACME");
    assert_eq!(p.channel, "#maintenance-line1");
    assert_eq!(p.alert_threshold, Some(0.6));
    assert_eq!(p.escalation_target(), "#maintenance-line1");
    assert_eq!(table.policy("EQ-001-ACME").escalation_target(), "#plant-managers");
    assert_eq!(table.policy("EQ-001-ACME").escalation_delay(), Duration::from_secs(900));
  }

  #[test]
  fn unknown_device_uses_fallback() {
    let config = Config::default();
    let table = RoutingTable::from_json_str(TABLE, &config).unwrap();
    let p = table.policy("EQ-999");
    assert_eq!(p.channel, "#predictive-maintenance");
    assert_eq!(p.escalation_delay_minutes, 30);
    assert_eq!(p.priority, Priority::Medium);
  }

  #[test]
  fn rejects_duplicate_devices() {
    let config = Config::default();
    let json = r##"[
      {"deviceId": "EQ-1", "channel": "#a", "priority": "low", "escalationDelayMinutes": 10},
      {"deviceId": "eq-1", "channel": "#b", "priority": "low", "escalationDelayMinutes": 10}
    ]"##;
    assert!(RoutingTable::from_json_str(json, &config).is_err());
  }

  #[test]
  fn rejects_oversized_escalation_delay() {
    let config = Config::default();
    let json = r##"[
      {"deviceId": "EQ-1", "channel": "#a", "priority": "low", "escalationDelayMinutes": 18446744073709551615}
    ]"##;
    let err = RoutingTable::from_json_str(json, &config).unwrap_err();
    assert!(err.to_string().contains("escalationDelayMinutes"));

    let policy = DevicePolicy {
      escalation_delay_minutes: u64::MAX,
      ..table_policy()
    };
    assert_eq!(policy.escalation_delay(), Duration::from_secs(u64::MAX));

    let config = Config {
      default_escalation_delay_minutes: MAX_ESCALATION_DELAY_MINUTES + 1,
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  fn table_policy() -> DevicePolicy {
    RoutingTable::from_json_str(TABLE, &Config::default())
      .unwrap()
      .policy("EQ-001-ACME")
      .clone()
  }

  #[test]
  fn config_validation() {
    let config = Config {
      critical_threshold: 0.4,
      ..Config::default()
    };
    assert!(config.validate().is_err());
    assert!(Config::default().validate().is_ok());
  }
}
