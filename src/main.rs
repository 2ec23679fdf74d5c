//! Sentinel - service health monitoring and auto-remediation.
//!
//! Probes a fleet of HTTP services on a fixed cadence, keeps their health
//! history in SQLite, opens and resolves incidents, tries to wake sleeping
//! services, and answers operator queries over a JSON API.

mod chat;
mod config;
mod db;
mod monitor;
mod probe;
mod scheduler;
mod sentinel;
mod web;

use config::ServerConfig;
use db::Store;
use probe::HttpProber;
use scheduler::{MonitorLoop, RetentionManager};
use sentinel::Sentinel;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("sentinel=info".parse()?))
        .init();

    let cfg = ServerConfig::load();
    tracing::info!("Starting Sentinel on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    for target in &cfg.targets {
        tracing::info!(
            "Monitoring {} at {}{}",
            target.name,
            target.probe_url,
            if target.is_critical { " (critical)" } else { "" }
        );
    }

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober = Arc::new(HttpProber::new()?);
    let sentinel = Arc::new(Sentinel::new(cfg.targets.clone(), store.clone(), prober, &cfg.monitor));

    let monitor = MonitorLoop::new(sentinel.clone(), cfg.monitor.check_interval);
    monitor.start().await;

    let retention = RetentionManager::new(store, cfg.monitor.retention_days, cfg.monitor.prune_interval);
    retention.start().await;

    let server = Server::new(cfg.http_port, sentinel);
    server.start(shutdown_signal()).await?;

    monitor.stop().await;
    retention.stop().await;
    tracing::info!("Sentinel stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
