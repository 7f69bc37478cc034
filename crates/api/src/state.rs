use std::sync::Arc;

use teeforge_core::store::TaskStore;

use crate::artifacts::ArtifactStore;
use crate::config::ServerConfig;
use crate::ws::{Dispatcher, WorkerRegistry};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Canonical task records and the pending queue.
    pub tasks: Arc<TaskStore>,
    /// Currently connected workers.
    pub workers: Arc<WorkerRegistry>,
    /// Worker protocol handler, sharing `tasks` and `workers`.
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Wire the store, a fresh worker registry and the dispatcher together.
    pub fn new(
        config: ServerConfig,
        tasks: Arc<TaskStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let workers = Arc::new(WorkerRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&tasks),
            Arc::clone(&workers),
            artifacts,
            config.close_superseded_workers,
        );
        Self {
            config: Arc::new(config),
            tasks,
            workers,
            dispatcher,
        }
    }
}
