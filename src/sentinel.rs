//! The Sentinel engine instance.
//!
//! Owns the configured targets and every component, and is shared by the
//! monitoring loop and the API as an explicit `Arc<Sentinel>`.

use crate::chat::{ChatInterface, ChatResponse};
use crate::config::MonitorConfig;
use crate::db::{Alert, DbError, Incident, Stats, Store, Target};
use crate::monitor::{
    AutoHealer, HealthChecker, HealthScorer, IncidentManager, RetryPolicy, SystemSnapshot, Transition,
};
use crate::probe::Prober;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("store failure: {0}")]
    Store(#[from] DbError),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

/// What one monitoring tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Samples lost because they could not be written
    pub write_failures: usize,
    pub opened: usize,
    pub resolved: usize,
    pub healed: usize,
}

struct Counters {
    started_at: DateTime<Utc>,
    total_checks: AtomicU64,
    total_incidents: AtomicU64,
    auto_fixes: AtomicU64,
}

/// An incident as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentView {
    #[serde(flatten)]
    pub incident: Incident,
    pub requires_manual_intervention: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeSummary {
    pub target: String,
    pub uptime_1h: f64,
    pub uptime_24h: f64,
    pub uptime_7d: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub is_critical: bool,
    pub healthy: Option<bool>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_24h: f64,
    pub consecutive_failures: u32,
    pub open_incident: Option<Incident>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub started_at: DateTime<Utc>,
    pub total_checks: u64,
    pub total_incidents: u64,
    pub auto_fixes: u64,
    pub health_score_24h: u32,
    pub db_size_bytes: i64,
    pub stored_samples: i64,
    pub services: Vec<ServiceStatus>,
}

pub struct Sentinel {
    targets: Vec<Target>,
    store: Arc<Store>,
    checker: Arc<HealthChecker>,
    incidents: IncidentManager,
    healer: AutoHealer,
    scorer: HealthScorer,
    chat: ChatInterface,
    counters: Counters,
}

impl Sentinel {
    pub fn new(
        targets: Vec<Target>,
        store: Arc<Store>,
        prober: Arc<dyn Prober>,
        config: &MonitorConfig,
    ) -> Self {
        let checker = Arc::new(HealthChecker::new(store.clone(), prober, config));
        let incidents = IncidentManager::new(store.clone(), config.hysteresis_threshold);
        let healer = AutoHealer::new(store.clone(), checker.clone(), RetryPolicy::from_config(config));
        let scorer = HealthScorer::new(store.clone());
        let chat = ChatInterface::new(targets.iter().map(|t| t.name.clone()).collect());

        Self {
            targets,
            store,
            checker,
            incidents,
            healer,
            scorer,
            chat,
            counters: Counters {
                started_at: Utc::now(),
                total_checks: AtomicU64::new(0),
                total_incidents: AtomicU64::new(0),
                auto_fixes: AtomicU64::new(0),
            },
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Result<&Target, SentinelError> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SentinelError::UnknownTarget(name.to_string()))
    }

    /// Probe every target once, in configured order.
    ///
    /// Store failures are logged per target and never abort the tick.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for target in &self.targets {
            self.counters.total_checks.fetch_add(1, Ordering::Relaxed);
            report.probed += 1;

            let sample = match self.checker.check(target).await {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::error!("Failed to record sample for {}: {}", target.name, e);
                    report.write_failures += 1;
                    continue;
                }
            };
            if sample.is_healthy {
                report.healthy += 1;
            } else {
                report.unhealthy += 1;
            }

            let transition = match self.incidents.evaluate(target, &sample) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to evaluate incidents for {}: {}", target.name, e);
                    continue;
                }
            };

            match transition {
                Transition::Opened(incident) => {
                    self.counters.total_incidents.fetch_add(1, Ordering::Relaxed);
                    report.opened += 1;
                    self.healer.reset(&target.name);
                    if self.auto_heal(target, &incident).await {
                        report.healed += 1;
                    }
                }
                Transition::Ongoing(incident) => {
                    if self.auto_heal(target, &incident).await {
                        report.healed += 1;
                    }
                }
                Transition::Resolved(_) => {
                    report.resolved += 1;
                    self.healer.reset(&target.name);
                }
                Transition::None => {}
            }
        }

        report
    }

    async fn auto_heal(&self, target: &Target, incident: &Incident) -> bool {
        if !incident.category.is_recoverable() {
            return false;
        }
        if self.healer.requires_manual_intervention(&target.name) {
            tracing::debug!("Skipping auto-heal for {}: manual intervention required", target.name);
            return false;
        }
        let healed = self.healer.attempt_heal(target).await;
        if healed {
            self.after_heal(&target.name);
        }
        healed
    }

    fn after_heal(&self, name: &str) {
        self.incidents.reset(name);
        self.counters.auto_fixes.fetch_add(1, Ordering::Relaxed);
    }

    /// Operator-triggered wake-up of a target.
    pub async fn heal(&self, name: &str) -> Result<bool, SentinelError> {
        let target = self.target(name)?;
        let healed = self.healer.attempt_heal(target).await;
        if healed {
            self.after_heal(name);
        }
        Ok(healed)
    }

    pub fn stats(&self, name: &str, hours: i64) -> Result<Stats, SentinelError> {
        self.target(name)?;
        Ok(self.store.stats(name, hours)?)
    }

    pub fn snapshot(&self) -> Result<SystemSnapshot, SentinelError> {
        Ok(self.scorer.snapshot(&self.targets)?)
    }

    pub fn unresolved_alerts(&self) -> Result<Vec<Alert>, SentinelError> {
        Ok(self.store.unresolved_alerts()?)
    }

    /// Open incidents, or the last 100 of any state.
    pub fn incidents(&self, open_only: bool) -> Result<Vec<IncidentView>, SentinelError> {
        let incidents = self.store.list_incidents(open_only, 100)?;
        Ok(incidents
            .into_iter()
            .map(|incident| IncidentView {
                requires_manual_intervention: incident.is_open()
                    && self.healer.requires_manual_intervention(&incident.target),
                incident,
            })
            .collect())
    }

    pub fn uptime_summary(&self) -> Result<Vec<UptimeSummary>, SentinelError> {
        self.targets
            .iter()
            .map(|t| {
                Ok(UptimeSummary {
                    target: t.name.clone(),
                    uptime_1h: self.store.stats(&t.name, 1)?.uptime,
                    uptime_24h: self.store.stats(&t.name, 24)?.uptime,
                    uptime_7d: self.store.stats(&t.name, 24 * 7)?.uptime,
                })
            })
            .collect()
    }

    pub fn status(&self) -> Result<StatusReport, SentinelError> {
        let mut services = Vec::with_capacity(self.targets.len());
        for t in &self.targets {
            let latest = self.store.latest_sample(&t.name)?;
            services.push(ServiceStatus {
                name: t.name.clone(),
                is_critical: t.is_critical,
                healthy: latest.as_ref().map(|s| s.is_healthy),
                status_code: latest.as_ref().map(|s| s.status_code),
                latency_ms: latest.as_ref().map(|s| s.latency_ms),
                last_check: latest.as_ref().map(|s| s.timestamp),
                uptime_24h: self.store.stats(&t.name, 24)?.uptime,
                consecutive_failures: self.incidents.consecutive_failures(&t.name),
                open_incident: self.store.open_incident(&t.name)?,
            });
        }

        Ok(StatusReport {
            started_at: self.counters.started_at,
            total_checks: self.counters.total_checks.load(Ordering::Relaxed),
            total_incidents: self.counters.total_incidents.load(Ordering::Relaxed),
            auto_fixes: self.counters.auto_fixes.load(Ordering::Relaxed),
            health_score_24h: self.scorer.score(&self.targets, 24)?,
            db_size_bytes: self.store.get_db_size_bytes()?,
            stored_samples: self.store.count_samples()?,
            services,
        })
    }

    /// Answer a free-text operator request.
    pub async fn handle_message(&self, text: &str) -> ChatResponse {
        self.chat.handle(self, text).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{temp_store, FailureCategory, Severity};
    use crate::monitor::{RESOLUTION_AUTO_HEALED, RESOLUTION_RESTORED};
    use crate::probe::testing::ScriptedProber;
    use std::time::Duration;

    pub(crate) const URL_A: &str = "http://api-a.internal/health";
    pub(crate) const URL_B: &str = "http://api-b.internal/health";

    pub(crate) fn sentinel(
        prober: Arc<ScriptedProber>,
    ) -> (tempfile::NamedTempFile, Arc<Store>, Sentinel) {
        let (tmp, store) = temp_store();
        let config = MonitorConfig {
            heal_delay: Duration::ZERO,
            ..MonitorConfig::default()
        };
        let targets = vec![Target::new("api-a", URL_A, true), Target::new("api-b", URL_B, true)];
        let sentinel = Sentinel::new(targets, store.clone(), prober, &config);
        (tmp, store, sentinel)
    }

    #[tokio::test]
    async fn test_timeouts_open_then_recovery_restores() {
        let prober = Arc::new(ScriptedProber::new());
        // tick 1: one probe; ticks 2 and 3: one probe plus three wake-up attempts
        for _ in 0..9 {
            prober.push_timeout(URL_A);
        }
        let (_tmp, store, sentinel) = sentinel(prober.clone());

        let first = sentinel.tick().await;
        assert_eq!(first.opened, 0);
        assert!(store.open_incident("api-a").unwrap().is_none());

        let second = sentinel.tick().await;
        assert_eq!(second.opened, 1);
        let open = store.open_incident("api-a").unwrap().unwrap();
        assert_eq!(open.category, FailureCategory::Timeout);
        // api-a is critical: HIGH upgraded to CRITICAL
        assert_eq!(open.severity, Severity::Critical);

        sentinel.tick().await;
        assert_eq!(store.list_incidents(true, 10).unwrap().len(), 1);

        let fourth = sentinel.tick().await;
        assert_eq!(fourth.resolved, 1);
        assert!(store.open_incident("api-a").unwrap().is_none());
        let closed = &store.list_incidents(false, 10).unwrap()[0];
        assert_eq!(closed.resolution.as_deref(), Some(RESOLUTION_RESTORED));
        assert!(!closed.auto_fixed);
        assert_eq!(prober.calls(URL_A), 10);
    }

    #[tokio::test]
    async fn test_server_errors_heal_exhausted_stays_open() {
        let prober = Arc::new(ScriptedProber::new());
        for _ in 0..5 {
            prober.push_status(URL_B, 500, 20);
        }
        let (_tmp, store, sentinel) = sentinel(prober.clone());

        sentinel.tick().await;
        let report = sentinel.tick().await;
        assert_eq!(report.opened, 1);
        assert_eq!(report.healed, 0);

        // 2 checks + 3 wake-up attempts
        assert_eq!(prober.calls(URL_B), 5);
        let open = store.open_incident("api-b").unwrap().unwrap();
        assert!(!open.auto_fixed);
        assert_eq!(open.severity, Severity::Critical);
        assert_eq!(open.recommendation, "application error, inspect logs");
    }

    #[tokio::test]
    async fn test_loop_auto_heals_recoverable_incident() {
        let prober = Arc::new(ScriptedProber::new());
        for _ in 0..3 {
            prober.push_status(URL_B, 503, 20);
        }
        let (_tmp, store, sentinel) = sentinel(prober.clone());

        sentinel.tick().await;
        let report = sentinel.tick().await;
        assert_eq!(report.opened, 1);
        assert_eq!(report.healed, 1);
        // 2 checks + failed attempt + healthy attempt
        assert_eq!(prober.calls(URL_B), 4);

        let incident = &store.list_incidents(false, 10).unwrap()[0];
        assert!(incident.auto_fixed);
        assert_eq!(incident.resolution.as_deref(), Some(RESOLUTION_AUTO_HEALED));
        assert_eq!(sentinel.status().unwrap().auto_fixes, 1);

        // the next healthy sample finds nothing to close
        let report = sentinel.tick().await;
        assert_eq!(report.resolved, 0);
    }

    #[tokio::test]
    async fn test_client_errors_are_never_auto_healed() {
        let prober = Arc::new(ScriptedProber::new());
        for _ in 0..2 {
            prober.push_status(URL_B, 404, 20);
        }
        let (_tmp, store, sentinel) = sentinel(prober.clone());

        sentinel.tick().await;
        sentinel.tick().await;
        assert_eq!(prober.calls(URL_B), 2);
        let open = store.open_incident("api-b").unwrap().unwrap();
        assert_eq!(open.category, FailureCategory::ClientError);
        // LOW upgraded for a critical target
        assert_eq!(open.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_loop_stops_healing_after_manual_intervention() {
        let prober = Arc::new(ScriptedProber::new());
        for _ in 0..40 {
            prober.push_refused(URL_A);
        }
        let (_tmp, _store, sentinel) = sentinel(prober.clone());

        for _ in 0..6 {
            sentinel.tick().await;
        }
        // tick 1 probe, ticks 2-4 probe + 3 attempts, ticks 5-6 probe only
        assert_eq!(prober.calls(URL_A), 1 + 3 * 4 + 2);

        let incidents = sentinel.incidents(true).unwrap();
        let view = incidents.iter().find(|v| v.incident.target == "api-a").unwrap();
        assert!(view.requires_manual_intervention);
    }

    #[tokio::test]
    async fn test_operator_heals_do_not_count_against_next_incident() {
        let prober = Arc::new(ScriptedProber::new());
        for _ in 0..9 {
            prober.push_refused(URL_A);
        }
        let (_tmp, store, sentinel) = sentinel(prober.clone());

        for _ in 0..3 {
            assert!(!sentinel.heal("api-a").await.unwrap());
        }
        assert_eq!(prober.calls(URL_A), 9);
        assert_eq!(sentinel.tick().await.healthy, 2);

        for _ in 0..5 {
            prober.push_refused(URL_A);
        }
        sentinel.tick().await;
        let report = sentinel.tick().await;
        assert_eq!(report.opened, 1);
        // 2 checks + 3 wake-up attempts on the new incident
        assert_eq!(prober.calls(URL_A), 9 + 1 + 5);
        assert!(store.open_incident("api-a").unwrap().is_some());

        let views = sentinel.incidents(true).unwrap();
        assert_eq!(views.len(), 1);
        assert!(!views[0].requires_manual_intervention);
    }

    #[tokio::test]
    async fn test_store_write_failure_moves_on_to_next_target() {
        let prober = Arc::new(ScriptedProber::new());
        let (tmp, store, sentinel) = sentinel(prober.clone());

        let conn = rusqlite::Connection::open(tmp.path()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_api_a BEFORE INSERT ON metrics
             WHEN NEW.target = 'api-a'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

        let report = sentinel.tick().await;
        assert_eq!(report.probed, 2);
        assert_eq!(report.write_failures, 1);
        assert_eq!(report.healthy, 1);
        assert_eq!(prober.calls(URL_A), 1);
        assert_eq!(prober.calls(URL_B), 1);
        assert_eq!(store.count_samples().unwrap(), 1);
        assert!(store.latest_sample("api-a").unwrap().is_none());
        assert!(store.latest_sample("api-b").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heal_unknown_target() {
        let (_tmp, _store, sentinel) = sentinel(Arc::new(ScriptedProber::new()));
        assert!(matches!(
            sentinel.heal("nope").await,
            Err(SentinelError::UnknownTarget(name)) if name == "nope"
        ));
        let healed = tokio_test::assert_ok!(sentinel.heal("api-a").await);
        assert!(healed);
    }

    #[tokio::test]
    async fn test_status_and_counters() {
        let prober = Arc::new(ScriptedProber::new());
        prober.push_status(URL_A, 200, 30);
        let (_tmp, _store, sentinel) = sentinel(prober);

        let report = sentinel.tick().await;
        assert_eq!(report.probed, 2);
        assert_eq!(report.healthy, 2);

        let status = sentinel.status().unwrap();
        assert_eq!(status.total_checks, 2);
        assert_eq!(status.stored_samples, 2);
        assert_eq!(status.services[0].name, "api-a");
        assert_eq!(status.services[0].latency_ms, Some(30.0));
        assert_eq!(status.services[0].healthy, Some(true));
        assert!(status.services[0].open_incident.is_none());

        let uptime = sentinel.uptime_summary().unwrap();
        assert_eq!(uptime.len(), 2);
        assert_eq!(uptime[0].uptime_24h, 100.0);
        assert_eq!(status.health_score_24h, 100);
    }
}
