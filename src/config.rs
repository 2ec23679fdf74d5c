//! Configuration module for Sentinel.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::db::Target;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Delay strategy between auto-heal attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt
    Fixed,
    /// Doubling delay with random jitter
    Exponential,
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "exponential" | "exp" => Ok(Backoff::Exponential),
            other => Err(format!("unknown backoff: {}", other)),
        }
    }
}

/// Tunables of the monitoring engine.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive unhealthy samples before an incident opens
    pub hysteresis_threshold: u32,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub heal_max_retries: u32,
    pub heal_delay: Duration,
    pub heal_backoff: Backoff,
    pub retention_days: i64,
    pub prune_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            hysteresis_threshold: 2,
            latency_warning_ms: 2000.0,
            latency_critical_ms: 5000.0,
            heal_max_retries: 3,
            heal_delay: Duration::from_secs(2),
            heal_backoff: Backoff::Fixed,
            retention_days: 30,
            prune_interval: Duration::from_secs(3600),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 5059)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sentinel.db")
    pub db_path: String,
    pub monitor: MonitorConfig,
    pub targets: Vec<Target>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 5059,
            db_path: "sentinel.db".to_string(),
            monitor: MonitorConfig::default(),
            targets: default_targets(),
        }
    }
}

/// The fleet monitored when no targets are configured.
pub fn default_targets() -> Vec<Target> {
    vec![
        Target::new("gateway", "http://localhost:5055/", true),
        Target::new("curator", "http://localhost:5061/", true),
        Target::new("narrator", "http://localhost:5056/", true),
        Target::new("publisher", "http://localhost:5058/", false),
        Target::new("monetizer", "http://localhost:5060/", true),
        Target::new("public", "http://localhost:5062/", true),
        Target::new("web", "http://localhost:5000/", true),
    ]
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SENTINEL_HTTP_PORT`: HTTP port (default: 5059)
    /// - `SENTINEL_DB_PATH`: Database file path (default: "sentinel.db")
    /// - `SENTINEL_CHECK_INTERVAL_SEC`: Monitoring tick interval (default: 30)
    /// - `SENTINEL_PROBE_TIMEOUT_SEC`: Per-probe timeout (default: 5)
    /// - `SENTINEL_HYSTERESIS`: Failures before an incident opens (default: 2)
    /// - `SENTINEL_LATENCY_WARNING_MS` / `SENTINEL_LATENCY_CRITICAL_MS` (default: 2000 / 5000)
    /// - `SENTINEL_HEAL_MAX_RETRIES`: Auto-heal attempts (default: 3)
    /// - `SENTINEL_HEAL_DELAY_SEC`: Delay before each attempt (default: 2)
    /// - `SENTINEL_HEAL_BACKOFF`: `fixed` or `exponential` (default: fixed)
    /// - `SENTINEL_RETENTION_DAYS`: Sample retention (default: 30)
    /// - `SENTINEL_PRUNE_INTERVAL_SEC`: Retention pass interval (default: 3600)
    /// - `SENTINEL_TARGETS`: `name=url,name=url` (default: the built-in fleet)
    /// - `SENTINEL_CRITICAL_TARGETS`: `name,name` marked critical
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unparseable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "SENTINEL_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(db_path) = lookup("SENTINEL_DB_PATH") {
            cfg.db_path = db_path;
        }

        let m = &mut cfg.monitor;
        if let Some(d) = parse_secs(&lookup, "SENTINEL_CHECK_INTERVAL_SEC").filter(|d| !d.is_zero()) {
            m.check_interval = d;
        }
        if let Some(d) = parse_secs(&lookup, "SENTINEL_PROBE_TIMEOUT_SEC").filter(|d| !d.is_zero()) {
            m.probe_timeout = d;
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "SENTINEL_HYSTERESIS").filter(|n| *n > 0) {
            m.hysteresis_threshold = n;
        }
        if let Some(ms) = parse_var(&lookup, "SENTINEL_LATENCY_WARNING_MS") {
            m.latency_warning_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "SENTINEL_LATENCY_CRITICAL_MS") {
            m.latency_critical_ms = ms;
        }
        if let Some(n) = parse_var(&lookup, "SENTINEL_HEAL_MAX_RETRIES") {
            m.heal_max_retries = n;
        }
        if let Some(d) = parse_secs(&lookup, "SENTINEL_HEAL_DELAY_SEC") {
            m.heal_delay = d;
        }
        if let Some(backoff) = parse_var(&lookup, "SENTINEL_HEAL_BACKOFF") {
            m.heal_backoff = backoff;
        }
        if let Some(days) = parse_var::<i64, _>(&lookup, "SENTINEL_RETENTION_DAYS").filter(|d| *d > 0) {
            m.retention_days = days;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SENTINEL_PRUNE_INTERVAL_SEC").filter(|s| *s > 0) {
            m.prune_interval = Duration::from_secs(secs);
        }

        let critical: Vec<String> = lookup("SENTINEL_CRITICAL_TARGETS")
            .map(|s| split_list(&s).map(str::to_string).collect())
            .unwrap_or_default();

        if let Some(list) = lookup("SENTINEL_TARGETS") {
            let targets = parse_targets(&list, &critical);
            if targets.is_empty() {
                tracing::warn!("SENTINEL_TARGETS has no valid entries, using defaults");
            } else {
                cfg.targets = targets;
            }
        } else if !critical.is_empty() {
            for target in &mut cfg.targets {
                target.is_critical = critical.contains(&target.name);
            }
        }

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

/// Seconds as a `Duration`. Negative, NaN and out-of-range values are ignored.
fn parse_secs<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: f64 = parse_var(lookup, key)?;
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!("Ignoring out-of-range duration for {}: {}", key, secs);
            None
        }
    }
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty())
}

/// Parse `name=url` pairs. Malformed or duplicate names are skipped.
pub fn parse_targets(list: &str, critical: &[String]) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();

    for entry in split_list(list) {
        let Some((name, url)) = entry.split_once('=') else {
            tracing::warn!("Skipping malformed target entry: {}", entry);
            continue;
        };
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            tracing::warn!("Skipping malformed target entry: {}", entry);
            continue;
        }
        if targets.iter().any(|t| t.name == name) {
            tracing::warn!("Skipping duplicate target: {}", name);
            continue;
        }
        targets.push(Target::new(name, url, critical.iter().any(|c| c == name)));
    }

    targets
}
