use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ws::registry::WorkerRegistry;

/// Ping every registered worker once per `every`, keeping idle sockets
/// alive through proxies. The first round goes out after one full period.
///
/// Runs until the returned handle is aborted.
pub fn start_heartbeat(workers: Arc<WorkerRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            let count = workers.worker_count().await;
            if count > 0 {
                tracing::debug!(count, "Pinging workers");
                workers.ping_all().await;
            }
        }
    })
}
