//! Retention manager for cleaning up old data.

use crate::db::Store;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Manager for deleting data past the retention window.
pub struct RetentionManager {
    store: Arc<Store>,
    retention_days: i64,
    period: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: i64, period: Duration) -> Self {
        Self {
            store,
            retention_days,
            period,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub async fn start(&self) {
        let (tx, mut rx) = tokio::sync::broadcast::channel(1);
        *self.stop.lock().await = Some(tx);

        let store = self.store.clone();
        let retention_days = self.retention_days;
        let mut interval = tokio::time::interval(self.period);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, retention_days);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn process_retention(store: &Store, retention_days: i64) {
    match store.prune(retention_days) {
        Ok(report) if report.samples + report.alerts + report.incidents > 0 => {
            tracing::info!(
                "RetentionManager: Pruned {} samples, {} alerts, {} incidents older than {} days",
                report.samples,
                report.alerts,
                report.incidents,
                retention_days
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("RetentionManager: Failed to prune: {}", e),
    }
}
