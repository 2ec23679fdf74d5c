//! Health checker: probe, classify, record, alert.

use crate::config::MonitorConfig;
use crate::db::{Alert, AlertKind, AlertLevel, DbError, FailureCategory, Sample, Store, Target};
use crate::probe::{ProbeError, ProbeResponse, Prober};

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Probes targets and turns the outcome into recorded samples.
pub struct HealthChecker {
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    timeout: Duration,
    latency_warning_ms: f64,
    latency_critical_ms: f64,
}

impl HealthChecker {
    pub fn new(store: Arc<Store>, prober: Arc<dyn Prober>, config: &MonitorConfig) -> Self {
        Self {
            store,
            prober,
            timeout: config.probe_timeout,
            latency_warning_ms: config.latency_warning_ms,
            latency_critical_ms: config.latency_critical_ms,
        }
    }

    /// Probe a target, record the sample and raise any per-sample alerts.
    ///
    /// Fails only when the sample could not be written.
    pub async fn check(&self, target: &Target) -> Result<Sample, DbError> {
        let sample = self.probe(target).await;
        self.store.record_sample(&sample)?;
        tracing::debug!(
            "Checked {}: status={} latency={:.0}ms healthy={}",
            target.name,
            sample.status_code,
            sample.latency_ms,
            sample.is_healthy
        );
        self.update_alerts(&sample);
        Ok(sample)
    }

    /// Probe and classify without recording anything.
    pub async fn probe(&self, target: &Target) -> Sample {
        let start = Instant::now();
        let outcome = self.prober.probe(&target.probe_url, self.timeout).await;
        classify(&target.name, outcome, start.elapsed())
    }

    fn update_alerts(&self, sample: &Sample) {
        if sample.is_healthy {
            self.resolve(sample, AlertKind::Availability);
            if sample.latency_ms < self.latency_warning_ms {
                self.resolve(sample, AlertKind::Latency);
            }
        }

        let Some(alert) = evaluate_thresholds(sample, self.latency_warning_ms, self.latency_critical_ms)
        else {
            return;
        };

        tracing::warn!("[Alert {}] {}: {}", alert.level.as_str(), alert.target, alert.message);
        if let Err(e) = self.store.record_alert(&alert) {
            tracing::error!("Failed to record alert for {}: {}", alert.target, e);
        }
    }

    fn resolve(&self, sample: &Sample, kind: AlertKind) {
        match self.store.resolve_alerts(&sample.target, kind) {
            Ok(0) => {}
            Ok(n) => tracing::info!("Resolved {} {} alert(s) for {}", n, kind.as_str(), sample.target),
            Err(e) => tracing::error!("Failed to resolve alerts for {}: {}", sample.target, e),
        }
    }
}

/// Turn a probe outcome into a sample.
///
/// `elapsed` is used as the latency when no response was received.
pub fn classify(target: &str, outcome: Result<ProbeResponse, ProbeError>, elapsed: Duration) -> Sample {
    let (status_code, latency, category) = match outcome {
        Ok(resp) if resp.is_success() => (resp.status_code, resp.latency, None),
        Ok(resp) => (
            resp.status_code,
            resp.latency,
            Some(FailureCategory::from_status(resp.status_code)),
        ),
        Err(ProbeError::Timeout(_)) => (0, elapsed, Some(FailureCategory::Timeout)),
        Err(ProbeError::Unreachable(_)) | Err(ProbeError::Config(_)) => {
            (0, elapsed, Some(FailureCategory::ConnectionRefused))
        }
    };

    Sample {
        target: target.to_string(),
        timestamp: Utc::now(),
        status_code,
        latency_ms: latency.as_secs_f64() * 1000.0,
        is_healthy: category.is_none(),
        error_detail: category.map(|c| c.detail().to_string()),
    }
}

/// The alert a single sample warrants, if any.
pub fn evaluate_thresholds(sample: &Sample, warning_ms: f64, critical_ms: f64) -> Option<Alert> {
    let target = sample.target.as_str();

    if !sample.is_healthy {
        let alert = match sample.status_code {
            502..=504 => Alert::new(
                AlertLevel::Warning,
                AlertKind::Availability,
                target,
                format!("Service returning {} (likely sleeping or restarting)", sample.status_code),
            ),
            0 => Alert::new(
                AlertLevel::Critical,
                AlertKind::Availability,
                target,
                format!(
                    "Service unreachable: {}",
                    sample.error_detail.as_deref().unwrap_or("no response")
                ),
            ),
            code => Alert::new(
                AlertLevel::Warning,
                AlertKind::Availability,
                target,
                format!("Service unhealthy: HTTP {}", code),
            ),
        };
        return Some(alert);
    }

    if sample.latency_ms >= critical_ms {
        Some(Alert::new(
            AlertLevel::Critical,
            AlertKind::Latency,
            target,
            format!(
                "Latency critical: {:.0}ms (threshold: {:.0}ms)",
                sample.latency_ms, critical_ms
            ),
        ))
    } else if sample.latency_ms >= warning_ms {
        Some(Alert::new(
            AlertLevel::Warning,
            AlertKind::Latency,
            target,
            format!("Latency high: {:.0}ms (threshold: {:.0}ms)", sample.latency_ms, warning_ms),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_store;
    use crate::probe::testing::ScriptedProber;

    const URL: &str = "http://api-a.internal/health";

    fn checker(prober: Arc<ScriptedProber>) -> (tempfile::NamedTempFile, Arc<Store>, HealthChecker) {
        let (tmp, store) = temp_store();
        let checker = HealthChecker::new(store.clone(), prober, &MonitorConfig::default());
        (tmp, store, checker)
    }

    fn response(status_code: u16, latency_ms: u64) -> Result<ProbeResponse, ProbeError> {
        Ok(ProbeResponse {
            status_code,
            latency: Duration::from_millis(latency_ms),
        })
    }

    #[test]
    fn test_classify_outcomes() {
        let elapsed = Duration::from_millis(5000);

        let ok = classify("a", response(204, 30), elapsed);
        assert!(ok.is_healthy);
        assert_eq!(ok.status_code, 204);
        assert_eq!(ok.latency_ms, 30.0);
        assert_eq!(ok.error_detail, None);

        let timeout = classify("a", Err(ProbeError::Timeout(elapsed)), elapsed);
        assert!(!timeout.is_healthy);
        assert_eq!(timeout.status_code, 0);
        assert_eq!(timeout.error_detail.as_deref(), Some("timeout"));
        assert_eq!(timeout.latency_ms, 5000.0);

        let refused = classify("a", Err(ProbeError::Unreachable("refused".into())), elapsed);
        assert_eq!(refused.status_code, 0);
        assert_eq!(refused.error_detail.as_deref(), Some("connection_refused"));

        let server = classify("a", response(500, 10), elapsed);
        assert_eq!(server.error_detail.as_deref(), Some("http_5xx"));
        assert_eq!(server.failure_category(), Some(FailureCategory::ServerError));

        let client = classify("a", response(404, 10), elapsed);
        assert_eq!(client.error_detail.as_deref(), Some("http_4xx"));
        assert!(!client.is_healthy);
    }

    #[test]
    fn test_thresholds() {
        let base = classify("a", response(200, 10), Duration::ZERO);
        assert!(evaluate_thresholds(&base, 2000.0, 5000.0).is_none());

        let mut slow = base.clone();
        slow.latency_ms = 2000.0;
        let alert = evaluate_thresholds(&slow, 2000.0, 5000.0).unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);
        assert_eq!(alert.kind, AlertKind::Latency);

        slow.latency_ms = 5000.0;
        assert_eq!(evaluate_thresholds(&slow, 2000.0, 5000.0).unwrap().level, AlertLevel::Critical);

        let sleeping = classify("a", response(503, 10), Duration::ZERO);
        let alert = evaluate_thresholds(&sleeping, 2000.0, 5000.0).unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);
        assert!(alert.message.contains("503"));

        let down = classify("a", Err(ProbeError::Timeout(Duration::from_secs(5))), Duration::ZERO);
        let alert = evaluate_thresholds(&down, 2000.0, 5000.0).unwrap();
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.message, "Service unreachable: timeout");
    }

    #[tokio::test]
    async fn test_check_records_sample_and_alerts() {
        let prober = Arc::new(ScriptedProber::new());
        prober.push_refused(URL);
        prober.push_status(URL, 200, 2500);
        prober.push_status(URL, 200, 40);
        let (_tmp, store, checker) = checker(prober);
        let target = Target::new("api-a", URL, false);

        let sample = checker.check(&target).await.unwrap();
        assert!(!sample.is_healthy);
        let alerts = store.unresolved_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Availability);

        // healthy but slow: availability alert clears, latency alert raised
        checker.check(&target).await.unwrap();
        let alerts = store.unresolved_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Latency);

        // fast again: everything resolved
        checker.check(&target).await.unwrap();
        assert!(store.unresolved_alerts().unwrap().is_empty());

        assert_eq!(store.count_samples().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_probe_does_not_record() {
        let prober = Arc::new(ScriptedProber::new());
        let (_tmp, store, checker) = checker(prober.clone());
        let sample = checker.probe(&Target::new("api-a", URL, false)).await;
        assert!(sample.is_healthy);
        assert_eq!(prober.calls(URL), 1);
        assert_eq!(store.count_samples().unwrap(), 0);
    }
}
