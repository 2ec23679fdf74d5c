//! Scheduler module driving the monitoring tick and background pruning.

mod retention;

pub use retention::*;

use crate::sentinel::Sentinel;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Runs `Sentinel::tick` on a fixed cadence.
///
/// Ticks never overlap: each one is awaited to completion and a tick that
/// overruns the interval delays the next instead of bursting.
pub struct MonitorLoop {
    sentinel: Arc<Sentinel>,
    interval: Duration,
    stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl MonitorLoop {
    pub fn new(sentinel: Arc<Sentinel>, interval: Duration) -> Self {
        Self {
            sentinel,
            interval,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the loop in a background task.
    pub async fn start(&self) {
        let (tx, rx) = broadcast::channel(1);
        *self.stop.lock().await = Some(tx);

        tracing::info!(
            "Starting monitoring loop: {} targets every {:?}",
            self.sentinel.targets().len(),
            self.interval
        );
        tokio::spawn(run_loop(self.sentinel.clone(), self.interval, rx));
    }

    /// Stop the loop after the tick in progress, if any.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

async fn run_loop(sentinel: Arc<Sentinel>, period: Duration, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let report = sentinel.tick().await;
                tracing::debug!(
                    "Tick done: {} probed, {} unhealthy, {} opened, {} resolved, {} healed",
                    report.probed,
                    report.unhealthy,
                    report.opened,
                    report.resolved,
                    report.healed
                );
                if report.write_failures > 0 {
                    tracing::warn!("Tick lost {} sample(s) to store failures", report.write_failures);
                }
            }
        }
    }

    tracing::info!("Monitoring loop stopped");
}
