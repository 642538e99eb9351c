//! Pipeline metrics: daily buckets of counters and latency.
//!
//! Observational only; nothing here feeds back into pipeline decisions.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::types::{
  ActionKind, ActionStatus, AutomationAction, DedupeOutcome, NotificationKind, PipelineMetricsWindow,
  ProcessOutcome,
};

/// Format a timestamp into a day bucket key: "YYYY-MM-DD".
pub fn day_bucket(ts: &DateTime<Utc>) -> String {
  ts.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Default)]
struct DayCounters {
  received: u64,
  processed: u64,
  deduplicated: u64,
  work_orders: u64,
  alerts_sent: u64,
  thread_updates: u64,
  processing_ms_total: f64,
  failures: u64,
  incidents_opened: u64,
  false_positives: u64,
}

impl DayCounters {
  fn count_work_orders(&mut self, actions: &[AutomationAction]) {
    self.work_orders += actions
      .iter()
      .filter(|a| a.kind == ActionKind::CreateCase && a.status == ActionStatus::Executed)
      .count() as u64;
  }

  fn window(&self, date: &str) -> PipelineMetricsWindow {
    let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    PipelineMetricsWindow {
      date: date.to_string(),
      events_received: self.received,
      events_processed: self.processed,
      events_deduplicated: self.deduplicated,
      work_orders_created: self.work_orders,
      alerts_sent: self.alerts_sent,
      thread_updates: self.thread_updates,
      avg_processing_time_ms: if self.processed == 0 {
        0.0
      } else {
        self.processing_ms_total / self.processed as f64
      },
      failure_rate: ratio(self.failures, self.processed),
      false_positive_rate: ratio(self.false_positives, self.incidents_opened),
    }
  }
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
  days: Mutex<BTreeMap<String, DayCounters>>,
}

impl MetricsAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every inbound event, valid or not.
  pub fn record_received(&self, at: DateTime<Utc>) {
    self.bucket(at, |d| d.received += 1);
  }

  /// An event that passed validation and replay checks.
  pub fn record(&self, at: DateTime<Utc>, outcome: &ProcessOutcome, processing_ms: f64) {
    self.bucket(at, |d| {
      d.processed += 1;
      d.processing_ms_total += processing_ms.max(0.0);

      match outcome.decision.outcome {
        DedupeOutcome::NewAlert => d.incidents_opened += 1,
        DedupeOutcome::ThreadUpdate | DedupeOutcome::CooldownActive => d.deduplicated += 1,
        DedupeOutcome::BelowThreshold => {}
      }

      // Routable outcome with nothing delivered: retries exhausted.
      let undelivered = outcome.notification.is_none()
        && matches!(
          outcome.decision.outcome,
          DedupeOutcome::NewAlert | DedupeOutcome::ThreadUpdate
        );
      match &outcome.notification {
        Some(n) if n.kind == NotificationKind::ThreadCreated => d.alerts_sent += 1,
        Some(_) => d.thread_updates += 1,
        None => {}
      }

      // At most one failure per processed event, so the rate stays in [0, 1].
      if undelivered || outcome.actions.iter().any(|a| a.status == ActionStatus::Failed) {
        d.failures += 1;
      }
      d.count_work_orders(&outcome.actions);
    });
  }

  /// Actions finished outside event processing (escalations, retried
  /// assignments). They belong to no processed event, so their failures
  /// stay out of `failureRate`; the audit ledger records them.
  pub fn record_actions(&self, at: DateTime<Utc>, actions: &[AutomationAction]) {
    self.bucket(at, |d| {
      for action in actions {
        if action.kind == ActionKind::Escalate && action.status == ActionStatus::Executed {
          d.alerts_sent += 1;
        }
      }
      d.count_work_orders(actions);
    });
  }

  pub fn record_false_positive(&self, at: DateTime<Utc>) {
    self.bucket(at, |d| d.false_positives += 1);
  }

  pub fn snapshot(&self, date: &str) -> PipelineMetricsWindow {
    let days = self.lock();
    days
      .get(date)
      .map(|d| d.window(date))
      .unwrap_or_else(|| DayCounters::default().window(date))
  }

  /// Up to `n` populated buckets, newest first.
  pub fn recent(&self, n: usize) -> Vec<PipelineMetricsWindow> {
    let days = self.lock();
    days.iter().rev().take(n).map(|(k, d)| d.window(k)).collect()
  }

  fn bucket(&self, at: DateTime<Utc>, f: impl FnOnce(&mut DayCounters)) {
    let mut days = self.lock();
    f(days.entry(day_bucket(&at)).or_default());
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DayCounters>> {
    self.days.lock().unwrap_or_else(|p| p.into_inner())
  }
}
