//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monitored service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub probe_url: String,
    pub is_critical: bool,
}

impl Target {
    pub fn new(name: &str, probe_url: &str, is_critical: bool) -> Self {
        Self {
            name: name.to_string(),
            probe_url: probe_url.to_string(),
            is_critical,
        }
    }
}

/// One probe outcome. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    /// HTTP status, or 0 when no response was received
    pub status_code: u16,
    pub latency_ms: f64,
    pub is_healthy: bool,
    pub error_detail: Option<String>,
}

impl Sample {
    /// Failure category of an unhealthy sample; `None` when healthy.
    pub fn failure_category(&self) -> Option<FailureCategory> {
        if self.is_healthy {
            return None;
        }
        self.error_detail
            .as_deref()
            .and_then(FailureCategory::from_detail)
            .or_else(|| Some(FailureCategory::from_status(self.status_code)))
    }
}

/// Why a probe was considered unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    ConnectionRefused,
    /// 5xx response
    ServerError,
    /// Any other non-2xx response
    ClientError,
}

impl FailureCategory {
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            0 => FailureCategory::ConnectionRefused,
            500..=599 => FailureCategory::ServerError,
            _ => FailureCategory::ClientError,
        }
    }

    /// Value stored in `Sample::error_detail`.
    pub fn detail(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "timeout",
            FailureCategory::ConnectionRefused => "connection_refused",
            FailureCategory::ServerError => "http_5xx",
            FailureCategory::ClientError => "http_4xx",
        }
    }

    pub fn from_detail(detail: &str) -> Option<Self> {
        match detail {
            "timeout" => Some(FailureCategory::Timeout),
            "connection_refused" => Some(FailureCategory::ConnectionRefused),
            "http_5xx" => Some(FailureCategory::ServerError),
            "http_4xx" => Some(FailureCategory::ClientError),
            _ => None,
        }
    }

    /// Transient outages the auto-healer may retry. Client errors point at a
    /// code or config bug and are never auto-healed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FailureCategory::ClientError)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.detail())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "CRITICAL" => AlertLevel::Critical,
            "WARNING" => AlertLevel::Warning,
            _ => AlertLevel::Info,
        }
    }
}

/// What condition an alert reports; drives when it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Availability,
    Latency,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Availability => "availability",
            AlertKind::Latency => "latency",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "latency" => AlertKind::Latency,
            _ => AlertKind::Availability,
        }
    }
}

/// A raw per-sample anomaly signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub level: AlertLevel,
    pub kind: AlertKind,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

impl Alert {
    pub fn new(level: AlertLevel, kind: AlertKind, target: &str, message: String) -> Self {
        Self {
            id: 0,
            level,
            kind,
            target: target.to_string(),
            message,
            timestamp: Utc::now(),
            resolved: false,
        }
    }

    /// One-line form used in snapshots and chat replies.
    pub fn summary(&self) -> String {
        format!("[{}] {}: {}", self.level.as_str(), self.target, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, saturating at `Critical`.
    pub fn upgrade(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// The deduplicated, hysteresis-gated record of an ongoing problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub target: String,
    pub severity: Severity,
    pub category: FailureCategory,
    pub issue: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub auto_fixed: bool,
    pub resolution: Option<String>,
    pub recommendation: String,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Fields needed to open an incident.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub target: String,
    pub severity: Severity,
    pub category: FailureCategory,
    pub issue: String,
    pub recommendation: String,
    pub detected_at: DateTime<Utc>,
}

/// Rolling statistics for one target over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub target: String,
    pub period_hours: i64,
    pub count: usize,
    /// Percentage of healthy samples
    pub uptime: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Percentage of unhealthy samples
    pub error_rate: f64,
}

impl Stats {
    pub fn empty(target: &str, period_hours: i64) -> Self {
        Self {
            target: target.to_string(),
            period_hours,
            count: 0,
            uptime: 0.0,
            avg_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
            error_rate: 0.0,
        }
    }
}

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub samples: usize,
    pub alerts: usize,
    pub incidents: usize,
}
