//! Web server module.

mod handlers;

use crate::sentinel::Sentinel;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sentinel: Arc<Sentinel>,
}

/// Web server for Sentinel.
pub struct Server {
    http_port: u16,
    state: AppState,
}

impl Server {
    pub fn new(http_port: u16, sentinel: Arc<Sentinel>) -> Self {
        Self {
            http_port,
            state: AppState { sentinel },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/api/system/health", get(handlers::handle_system_health))
            .route("/api/metrics", get(handlers::handle_uptime_summary))
            .route("/api/metrics/{target}", get(handlers::handle_target_metrics))
            .route("/api/alerts", get(handlers::handle_alerts))
            .route("/api/incidents", get(handlers::handle_incidents))
            .route("/api/status", get(handlers::handle_status))
            .route("/api/targets", get(handlers::handle_targets))
            .route("/api/chat", post(handlers::handle_chat))
            .route("/api/heal/{target}", post(handlers::handle_heal))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;

        Ok(())
    }
}
