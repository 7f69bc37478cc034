//! Periodic sweep of tasks stuck in `processing`.
//!
//! The lazy check on status reads only resolves tasks somebody asks about.
//! This job fails overdue tasks nobody is polling, on a fixed interval
//! driven by `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use teeforge_core::store::TaskStore;
use tokio_util::sync::CancellationToken;

/// Run the timeout sweep loop until `cancel` is triggered.
pub async fn run(tasks: Arc<TaskStore>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        timeout_secs = tasks.timeout().num_seconds(),
        "Timeout reaper started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Timeout reaper stopping");
                break;
            }
            _ = ticker.tick() => {
                let reaped = tasks.sweep_timed_out().await;
                if reaped.is_empty() {
                    tracing::debug!("Timeout reaper: no overdue tasks");
                } else {
                    tracing::info!(count = reaped.len(), "Timeout reaper: failed overdue tasks");
                }
            }
        }
    }
}
