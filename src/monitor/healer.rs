//! Bounded-retry auto-remediation.
//!
//! Healing here means waking a target that went to sleep or is restarting:
//! the same liveness probe is retried a bounded number of times and the open
//! incident is closed as soon as one of them comes back healthy.

use super::checker::HealthChecker;
use crate::config::{Backoff, MonitorConfig};
use crate::db::{Store, Target};

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const RESOLUTION_AUTO_HEALED: &str = "auto-healed";

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How many attempts to make and how long to wait before each.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            max_retries: config.heal_max_retries,
            delay: config.heal_delay,
            backoff: config.heal_backoff,
        }
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let base = self.delay.saturating_mul(factor).min(MAX_BACKOFF);
                let jitter_ms = (self.delay.as_millis() / 2) as u64;
                let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
                base + Duration::from_millis(jitter)
            }
        }
    }
}

pub struct AutoHealer {
    store: Arc<Store>,
    checker: Arc<HealthChecker>,
    policy: RetryPolicy,
    /// Failed heal rounds per target during its current open incident
    failed_rounds: Mutex<HashMap<String, u32>>,
}

impl AutoHealer {
    pub fn new(store: Arc<Store>, checker: Arc<HealthChecker>, policy: RetryPolicy) -> Self {
        Self {
            store,
            checker,
            policy,
            failed_rounds: Mutex::new(HashMap::new()),
        }
    }

    fn rounds(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failed_rounds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn failed_rounds(&self, target: &str) -> u32 {
        self.rounds().get(target).copied().unwrap_or(0)
    }

    /// True once healing has failed `max_retries` times for the current incident.
    pub fn requires_manual_intervention(&self, target: &str) -> bool {
        self.failed_rounds(target) >= self.policy.max_retries
    }

    /// Forget the failed rounds of a target, e.g. when its incident closed.
    pub fn reset(&self, target: &str) {
        self.rounds().remove(target);
    }

    /// Retry the target's probe until it is healthy or the attempts run out.
    ///
    /// On success the open incident, if any, is closed as auto-fixed. On
    /// failure the incident is left untouched; the failed round only counts
    /// while an incident is open.
    pub async fn attempt_heal(&self, target: &Target) -> bool {
        tracing::info!("Attempting to wake up {}...", target.name);

        for attempt in 1..=self.policy.max_retries {
            tokio::time::sleep(self.policy.delay_for(attempt)).await;

            let sample = self.checker.probe(target).await;
            if sample.is_healthy {
                tracing::info!("{} is awake after {} attempt(s)", target.name, attempt);
                self.mark_healed(target);
                self.reset(&target.name);
                return true;
            }
            tracing::debug!(
                "Wake-up attempt {}/{} for {} failed: {}",
                attempt,
                self.policy.max_retries,
                target.name,
                sample.error_detail.as_deref().unwrap_or("unhealthy")
            );
        }

        match self.store.open_incident(&target.name) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!("Failed to wake {} (no open incident)", target.name);
                return false;
            }
            Err(e) => {
                tracing::error!("Failed to look up incident for {}: {}", target.name, e);
                return false;
            }
        }

        let rounds = {
            let mut rounds = self.rounds();
            let count = rounds.entry(target.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        tracing::warn!("Failed to wake {} (round {})", target.name, rounds);
        if rounds >= self.policy.max_retries {
            tracing::error!("{} requires manual intervention!", target.name);
        }

        false
    }

    fn mark_healed(&self, target: &Target) {
        let open = match self.store.open_incident(&target.name) {
            Ok(Some(open)) => open,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to look up incident for {}: {}", target.name, e);
                return;
            }
        };

        match self.store.close_incident(open.id, true, RESOLUTION_AUTO_HEALED) {
            Ok(Some(_)) => tracing::info!("Incident #{} for {} auto-healed", open.id, target.name),
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to close incident #{}: {}", open.id, e),
        }
    }
}
