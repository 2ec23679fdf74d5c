//! Hysteresis-gated incident state machine.
//!
//! Per target the state is either NONE or OPEN. An incident opens only after
//! `threshold` consecutive unhealthy samples and closes on the first healthy
//! one. The store enforces that at most one incident per target is open.

use crate::db::{DbError, FailureCategory, Incident, NewIncident, Sample, Severity, Store, Target};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const RESOLUTION_RESTORED: &str = "service restored";

/// What evaluating one sample did to the target's incident state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing open and nothing opened
    None,
    /// NONE -> OPEN
    Opened(Incident),
    /// Still OPEN after another unhealthy sample
    Ongoing(Incident),
    /// OPEN -> NONE
    Resolved(Incident),
}

/// Severity and wording for a newly opened incident.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub severity: Severity,
    pub issue: String,
    pub recommendation: String,
}

/// Look up the diagnosis for a failure, upgraded one level for critical targets.
pub fn diagnose(target: &Target, category: FailureCategory, status_code: u16) -> Diagnosis {
    let (severity, issue, recommendation) = match category {
        FailureCategory::Timeout => (
            Severity::High,
            format!("Service {} unresponsive (timeout)", target.name),
            "service unresponsive, verify process/deploy",
        ),
        FailureCategory::ConnectionRefused => (
            Severity::High,
            format!("Service {} unreachable (connection refused)", target.name),
            "service unresponsive, verify process/deploy",
        ),
        FailureCategory::ServerError => (
            Severity::High,
            format!("Service {} failing with HTTP {}", target.name, status_code),
            "application error, inspect logs",
        ),
        FailureCategory::ClientError => (
            Severity::Low,
            format!("Service {} answering HTTP {}", target.name, status_code),
            "verify routes/config",
        ),
    };

    Diagnosis {
        severity: if target.is_critical { severity.upgrade() } else { severity },
        issue,
        recommendation: recommendation.to_string(),
    }
}

/// Tracks consecutive failures and opens/resolves incidents.
pub struct IncidentManager {
    store: Arc<Store>,
    threshold: u32,
    failures: Mutex<HashMap<String, u32>>,
}

impl IncidentManager {
    pub fn new(store: Arc<Store>, threshold: u32) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current consecutive-failure count for a target.
    pub fn consecutive_failures(&self, target: &str) -> u32 {
        self.failures().get(target).copied().unwrap_or(0)
    }

    /// Forget the failure streak of a target.
    pub fn reset(&self, target: &str) {
        self.failures().remove(target);
    }

    /// Feed one sample through the state machine.
    pub fn evaluate(&self, target: &Target, sample: &Sample) -> Result<Transition, DbError> {
        if sample.is_healthy {
            self.reset(&target.name);
            return self.on_healthy(target);
        }

        let streak = {
            let mut failures = self.failures();
            let count = failures.entry(target.name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(open) = self.store.open_incident(&target.name)? {
            return Ok(Transition::Ongoing(open));
        }
        if streak < self.threshold {
            tracing::debug!(
                "{} unhealthy ({}/{} before incident)",
                target.name,
                streak,
                self.threshold
            );
            return Ok(Transition::None);
        }

        let category = sample
            .failure_category()
            .unwrap_or(FailureCategory::ConnectionRefused);
        let diagnosis = diagnose(target, category, sample.status_code);
        let new = NewIncident {
            target: target.name.clone(),
            severity: diagnosis.severity,
            category,
            issue: diagnosis.issue,
            recommendation: diagnosis.recommendation,
            detected_at: Utc::now(),
        };

        match self.store.open_incident_if_none(&new)? {
            Some(incident) => {
                tracing::warn!(
                    "Incident #{} opened for {} [{}]: {}",
                    incident.id,
                    incident.target,
                    incident.severity.as_str(),
                    incident.issue
                );
                Ok(Transition::Opened(incident))
            }
            None => Ok(self
                .store
                .open_incident(&target.name)?
                .map(Transition::Ongoing)
                .unwrap_or(Transition::None)),
        }
    }

    fn on_healthy(&self, target: &Target) -> Result<Transition, DbError> {
        let Some(open) = self.store.open_incident(&target.name)? else {
            return Ok(Transition::None);
        };

        // Already closed by the healer: that close stands.
        match self.store.close_incident(open.id, false, RESOLUTION_RESTORED)? {
            Some(closed) => {
                tracing::info!("Incident #{} for {} resolved: {}", closed.id, closed.target, RESOLUTION_RESTORED);
                Ok(Transition::Resolved(closed))
            }
            None => Ok(Transition::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_store;

    fn unhealthy(target: &str, category: FailureCategory, status_code: u16) -> Sample {
        Sample {
            target: target.to_string(),
            timestamp: Utc::now(),
            status_code,
            latency_ms: 100.0,
            is_healthy: false,
            error_detail: Some(category.detail().to_string()),
        }
    }

    fn healthy(target: &str) -> Sample {
        Sample {
            target: target.to_string(),
            timestamp: Utc::now(),
            status_code: 200,
            latency_ms: 20.0,
            is_healthy: true,
            error_detail: None,
        }
    }

    #[test]
    fn test_single_failure_never_opens() {
        let (_tmp, store) = temp_store();
        let manager = IncidentManager::new(store.clone(), 2);
        let target = Target::new("api-a", "http://a", false);

        let t = manager.evaluate(&target, &unhealthy("api-a", FailureCategory::Timeout, 0)).unwrap();
        assert_eq!(t, Transition::None);
        assert_eq!(manager.consecutive_failures("api-a"), 1);

        // a healthy sample breaks the streak
        assert_eq!(manager.evaluate(&target, &healthy("api-a")).unwrap(), Transition::None);
        assert_eq!(manager.consecutive_failures("api-a"), 0);

        let t = manager.evaluate(&target, &unhealthy("api-a", FailureCategory::Timeout, 0)).unwrap();
        assert_eq!(t, Transition::None);
        assert!(store.open_incident("api-a").unwrap().is_none());
    }

    #[test]
    fn test_threshold_opens_exactly_once() {
        let (_tmp, store) = temp_store();
        let manager = IncidentManager::new(store.clone(), 2);
        let target = Target::new("api-a", "http://a", false);
        let sample = unhealthy("api-a", FailureCategory::Timeout, 0);

        assert_eq!(manager.evaluate(&target, &sample).unwrap(), Transition::None);
        let opened = match manager.evaluate(&target, &sample).unwrap() {
            Transition::Opened(i) => i,
            other => panic!("expected Opened, got {:?}", other),
        };
        assert_eq!(opened.severity, Severity::High);
        assert_eq!(opened.category, FailureCategory::Timeout);
        assert_eq!(opened.recommendation, "service unresponsive, verify process/deploy");

        for _ in 0..3 {
            assert!(matches!(manager.evaluate(&target, &sample).unwrap(), Transition::Ongoing(_)));
        }
        assert_eq!(store.list_incidents(true, 10).unwrap().len(), 1);
        assert_eq!(store.list_incidents(false, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_healthy_sample_resolves() {
        let (_tmp, store) = temp_store();
        let manager = IncidentManager::new(store.clone(), 2);
        let target = Target::new("api-a", "http://a", false);
        let sample = unhealthy("api-a", FailureCategory::ConnectionRefused, 0);

        manager.evaluate(&target, &sample).unwrap();
        manager.evaluate(&target, &sample).unwrap();

        let resolved = match manager.evaluate(&target, &healthy("api-a")).unwrap() {
            Transition::Resolved(i) => i,
            other => panic!("expected Resolved, got {:?}", other),
        };
        assert_eq!(resolved.resolution.as_deref(), Some(RESOLUTION_RESTORED));
        assert!(!resolved.auto_fixed);
        assert!(resolved.resolved_at.is_some());
        assert!(store.open_incident("api-a").unwrap().is_none());
    }

    #[test]
    fn test_healer_close_is_not_overwritten() {
        let (_tmp, store) = temp_store();
        let manager = IncidentManager::new(store.clone(), 1);
        let target = Target::new("api-a", "http://a", false);

        let opened = match manager
            .evaluate(&target, &unhealthy("api-a", FailureCategory::ServerError, 502))
            .unwrap()
        {
            Transition::Opened(i) => i,
            other => panic!("expected Opened, got {:?}", other),
        };
        store.close_incident(opened.id, true, "auto-healed").unwrap();

        assert_eq!(manager.evaluate(&target, &healthy("api-a")).unwrap(), Transition::None);
        let all = store.list_incidents(false, 10).unwrap();
        assert_eq!(all[0].resolution.as_deref(), Some("auto-healed"));
        assert!(all[0].auto_fixed);
    }

    #[test]
    fn test_diagnosis_table() {
        let normal = Target::new("api", "http://a", false);
        let critical = Target::new("api", "http://a", true);

        let d = diagnose(&normal, FailureCategory::ServerError, 500);
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.recommendation, "application error, inspect logs");
        assert_eq!(diagnose(&critical, FailureCategory::ServerError, 500).severity, Severity::Critical);

        let d = diagnose(&normal, FailureCategory::ClientError, 404);
        assert_eq!(d.severity, Severity::Low);
        assert_eq!(d.recommendation, "verify routes/config");
        assert_eq!(diagnose(&critical, FailureCategory::ClientError, 404).severity, Severity::Medium);

        assert_eq!(diagnose(&critical, FailureCategory::Timeout, 0).severity, Severity::Critical);
    }
}
