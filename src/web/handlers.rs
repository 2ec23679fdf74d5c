//! HTTP request handlers.

use super::AppState;
use crate::sentinel::SentinelError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

impl IntoResponse for SentinelError {
    fn into_response(self) -> Response {
        match self {
            SentinelError::UnknownTarget(target) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown target", "target": target })),
            )
                .into_response(),
            SentinelError::Store(e) => {
                tracing::error!("Store failure while serving request: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "sentinel" }))
}

// ============================================================================
// API: Fleet views
// ============================================================================

pub async fn handle_system_health(State(state): State<AppState>) -> Response {
    match state.sentinel.snapshot() {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_uptime_summary(State(state): State<AppState>) -> Response {
    match state.sentinel.uptime_summary() {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_status(State(state): State<AppState>) -> Response {
    match state.sentinel.status() {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sentinel.targets().to_vec())
}

// ============================================================================
// API: Per-target metrics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub hours: Option<i64>,
}

pub async fn handle_target_metrics(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let hours = query.hours.filter(|h| *h > 0).unwrap_or(1);
    match state.sentinel.stats(&target, hours) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// API: Alerts and incidents
// ============================================================================

pub async fn handle_alerts(State(state): State<AppState>) -> Response {
    match state.sentinel.unresolved_alerts() {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    pub open_only: Option<bool>,
}

pub async fn handle_incidents(State(state): State<AppState>, Query(query): Query<IncidentsQuery>) -> Response {
    match state.sentinel.incidents(query.open_only.unwrap_or(true)) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// API: Operator actions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

pub async fn handle_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> impl IntoResponse {
    Json(state.sentinel.handle_message(&req.message).await)
}

pub async fn handle_heal(State(state): State<AppState>, Path(target): Path<String>) -> Response {
    match state.sentinel.heal(&target).await {
        Ok(success) => Json(json!({ "target": target, "action": "wake_up", "success": success })).into_response(),
        Err(e) => e.into_response(),
    }
}
