//! Composite health scores and the system snapshot.

use crate::db::{Alert, DbError, Stats, Store, Target};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Uptime above which a target counts as up.
pub const UP_CUTOFF_PERCENT: f64 = 90.0;

const SNAPSHOT_ALERTS: usize = 5;

pub fn latency_score(avg_latency_ms: f64) -> f64 {
    if avg_latency_ms < 500.0 {
        100.0
    } else if avg_latency_ms < 1000.0 {
        80.0
    } else if avg_latency_ms < 2000.0 {
        60.0
    } else {
        40.0
    }
}

pub fn error_score(error_rate: f64) -> f64 {
    if error_rate < 1.0 {
        100.0
    } else if error_rate < 5.0 {
        80.0
    } else if error_rate < 10.0 {
        60.0
    } else {
        40.0
    }
}

/// Weighted blend of uptime, latency and error sub-scores. A target without
/// samples scores 0.
pub fn composite(stats: &Stats) -> f64 {
    if stats.count == 0 {
        return 0.0;
    }
    0.5 * stats.uptime + 0.3 * latency_score(stats.avg_latency_ms) + 0.2 * error_score(stats.error_rate)
}

/// Mean composite over every target, truncated to 0..=100.
pub fn system_score(stats: &[Stats]) -> u32 {
    if stats.is_empty() {
        return 0;
    }
    let mean = stats.iter().map(composite).sum::<f64>() / stats.len() as f64;
    mean.clamp(0.0, 100.0) as u32
}

/// Derived view of the whole fleet. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub health_score: u32,
    pub services_up: usize,
    pub services_down: usize,
    #[serde(rename = "total_requests")]
    pub total_samples: usize,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    #[serde(rename = "alerts")]
    pub active_alert_summaries: Vec<String>,
}

/// Assemble a snapshot from per-target stats and the unresolved alerts.
pub fn build_snapshot(stats: &[Stats], alerts: &[Alert]) -> SystemSnapshot {
    let sampled: Vec<&Stats> = stats.iter().filter(|s| s.count > 0).collect();
    let mean = |f: fn(&Stats) -> f64| {
        if sampled.is_empty() {
            0.0
        } else {
            sampled.iter().map(|s| f(s)).sum::<f64>() / sampled.len() as f64
        }
    };

    let services_up = sampled.iter().filter(|s| s.uptime > UP_CUTOFF_PERCENT).count();

    SystemSnapshot {
        timestamp: Utc::now(),
        health_score: system_score(stats),
        services_up,
        services_down: stats.len() - services_up,
        total_samples: sampled.iter().map(|s| s.count).sum(),
        avg_latency_ms: mean(|s| s.avg_latency_ms),
        error_rate: mean(|s| s.error_rate),
        active_alert_summaries: alerts.iter().take(SNAPSHOT_ALERTS).map(Alert::summary).collect(),
    }
}

/// Read-only aggregator over the metric store.
pub struct HealthScorer {
    store: Arc<Store>,
}

impl HealthScorer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn collect_stats(&self, targets: &[Target], window_hours: i64) -> Result<Vec<Stats>, DbError> {
        targets
            .iter()
            .map(|t| self.store.stats(&t.name, window_hours))
            .collect()
    }

    /// System score over the given window.
    pub fn score(&self, targets: &[Target], window_hours: i64) -> Result<u32, DbError> {
        Ok(system_score(&self.collect_stats(targets, window_hours)?))
    }

    /// Snapshot over the last hour.
    pub fn snapshot(&self, targets: &[Target]) -> Result<SystemSnapshot, DbError> {
        let stats = self.collect_stats(targets, 1)?;
        let alerts = self.store.unresolved_alerts()?;
        Ok(build_snapshot(&stats, &alerts))
    }
}
