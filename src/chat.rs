//! Free-text operator queries.
//!
//! Messages are matched literally against a fixed intent table; there is no
//! language model behind this. Only `restart` writes anything.

use crate::db::{Alert, AlertLevel, Stats};
use crate::sentinel::{Sentinel, SentinelError};

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::sync::OnceLock;

const MAX_ALERTS: usize = 10;

const HELP_TEXT: &str = "Sentinel commands:
  status [target]   system or target health
  metrics <target>  1h and 24h statistics
  alerts            active alerts
  restart <target>  wake up a sleeping target
  help              this message

Examples: \"status gateway\", \"metrics curator\", \"restart narrator\", \"show me all alerts\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Status,
    Metrics,
    Alerts,
    Restart,
    Help,
    Unknown,
}

/// Keywords per intent, in priority order.
const INTENTS: &[(Intent, &[&str])] = &[
    (Intent::Status, &["status", "état", "health", "santé"]),
    (Intent::Metrics, &["metrics", "métriques", "stats", "statistiques"]),
    (Intent::Alerts, &["alerts", "alertes", "problems", "problèmes"]),
    (Intent::Restart, &["restart", "redémarrer", "wake", "réveiller"]),
    (Intent::Help, &["help", "aide", "?", "commandes"]),
];

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub response_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ChatResponse {
    fn text(intent: Intent, target: Option<&str>, response_text: String) -> Self {
        Self {
            intent,
            target: target.map(str::to_string),
            response_text,
            data: None,
        }
    }

    fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

fn words() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| Regex::new(r"[\p{L}\p{N}_\-]+|\?").expect("static regex"))
}

fn tokenize(text: &str) -> Vec<String> {
    words()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

pub struct ChatInterface {
    target_names: Vec<String>,
}

impl ChatInterface {
    pub fn new(target_names: Vec<String>) -> Self {
        Self { target_names }
    }

    /// Extract the intent and the target named in a message.
    pub fn parse(&self, text: &str) -> (Intent, Option<&str>) {
        let tokens = tokenize(text);

        let intent = INTENTS
            .iter()
            .find(|(_, keywords)| tokens.iter().any(|t| keywords.contains(&t.as_str())))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::Unknown);

        (intent, self.find_target(text, &tokens))
    }

    fn find_target(&self, text: &str, tokens: &[String]) -> Option<&str> {
        let exact = self
            .target_names
            .iter()
            .find(|name| tokens.iter().any(|t| *t == name.to_lowercase()));
        if let Some(name) = exact {
            return Some(name);
        }

        let lower = text.to_lowercase();
        self.target_names
            .iter()
            .filter(|name| lower.contains(&name.to_lowercase()))
            .max_by_key(|name| name.len())
            .map(String::as_str)
    }

    fn target_list(&self) -> String {
        self.target_names.join(", ")
    }

    pub async fn handle(&self, sentinel: &Sentinel, text: &str) -> ChatResponse {
        let (intent, target) = self.parse(text);
        let result = match intent {
            Intent::Status => self.status(sentinel, target),
            Intent::Metrics => self.metrics(sentinel, target),
            Intent::Alerts => alerts(sentinel),
            Intent::Restart => Ok(self.restart(sentinel, target).await),
            Intent::Help => Ok(ChatResponse::text(Intent::Help, None, HELP_TEXT.to_string())),
            Intent::Unknown => Ok(ChatResponse::text(
                Intent::Unknown,
                target,
                "I don't understand that command. Type 'help' for available commands.".to_string(),
            )),
        };

        result.unwrap_or_else(|e| {
            tracing::error!("Chat request {:?} failed: {}", text, e);
            ChatResponse::text(intent, target, format!("Unable to answer right now: {}", e))
        })
    }

    fn status(&self, sentinel: &Sentinel, target: Option<&str>) -> Result<ChatResponse, SentinelError> {
        let Some(name) = target else {
            let snapshot = sentinel.snapshot()?;
            let text = format!(
                "System health: {}/100\nServices: {} up, {} down\nActive alerts: {}",
                snapshot.health_score,
                snapshot.services_up,
                snapshot.services_down,
                sentinel.unresolved_alerts()?.len()
            );
            let data = serde_json::to_value(&snapshot).unwrap_or_default();
            return Ok(ChatResponse::text(Intent::Status, None, text).with_data(data));
        };

        let stats = sentinel.stats(name, 1)?;
        let text = format!(
            "{} status\nUptime: {:.1}%\nAvg latency: {:.0}ms\nError rate: {:.1}%\nChecks: {} in last hour",
            name, stats.uptime, stats.avg_latency_ms, stats.error_rate, stats.count
        );
        Ok(ChatResponse::text(Intent::Status, Some(name), text).with_data(stats_value(&stats)))
    }

    fn metrics(&self, sentinel: &Sentinel, target: Option<&str>) -> Result<ChatResponse, SentinelError> {
        let Some(name) = target else {
            return Ok(ChatResponse::text(
                Intent::Metrics,
                None,
                format!("Please specify a target: {}", self.target_list()),
            ));
        };

        let hour = sentinel.stats(name, 1)?;
        let day = sentinel.stats(name, 24)?;
        let text = format!(
            "{} metrics\n\nLast hour:\nP95 latency: {:.0}ms\nP99 latency: {:.0}ms\n\n\
             Last 24 hours:\nUptime: {:.1}%\nAvg latency: {:.0}ms\nTotal checks: {}",
            name, hour.p95_latency_ms, hour.p99_latency_ms, day.uptime, day.avg_latency_ms, day.count
        );
        Ok(ChatResponse::text(Intent::Metrics, Some(name), text)
            .with_data(json!({ "1h": stats_value(&hour), "24h": stats_value(&day) })))
    }

    async fn restart(&self, sentinel: &Sentinel, target: Option<&str>) -> ChatResponse {
        let Some(name) = target else {
            return ChatResponse::text(
                Intent::Restart,
                None,
                format!("Please specify a target to restart: {}", self.target_list()),
            );
        };

        match sentinel.heal(name).await {
            Ok(success) => {
                let text = if success {
                    format!("Successfully woke up {}", name)
                } else {
                    format!("Failed to wake up {}", name)
                };
                ChatResponse::text(Intent::Restart, Some(name), text).with_data(json!({ "success": success }))
            }
            Err(e) => ChatResponse::text(Intent::Restart, Some(name), e.to_string()),
        }
    }
}

fn alerts(sentinel: &Sentinel) -> Result<ChatResponse, SentinelError> {
    let alerts = sentinel.unresolved_alerts()?;
    if alerts.is_empty() {
        return Ok(ChatResponse::text(
            Intent::Alerts,
            None,
            "No active alerts - system is healthy!".to_string(),
        ));
    }

    let shown: Vec<&Alert> = alerts.iter().take(MAX_ALERTS).collect();
    let mut text = format!("{} active alerts:\n", alerts.len());
    for alert in &shown {
        let marker = if alert.level == AlertLevel::Critical { "!!" } else { "!" };
        text.push_str(&format!("{} {}\n", marker, alert.summary()));
    }
    let data = serde_json::to_value(&shown).unwrap_or_default();
    Ok(ChatResponse::text(Intent::Alerts, None, text).with_data(data))
}

fn stats_value(stats: &Stats) -> serde_json::Value {
    serde_json::to_value(stats).unwrap_or_default()
}
