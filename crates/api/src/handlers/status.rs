//! Handlers for task status and dispatcher diagnostics.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use teeforge_core::store::TaskStats;
use teeforge_core::task::TaskSnapshot;
use teeforge_core::types::Timestamp;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /status/{task_id} -- snapshot of one task.
///
/// Reading a task that has overrun its processing deadline fails it first.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<TaskSnapshot>> {
    let snapshot = state.tasks.get_status(&task_id).await?;
    Ok(Json(snapshot))
}

/// Aggregate view of the queue and connected workers.
#[derive(Debug, Serialize)]
pub struct DispatcherOverview {
    pub queue_size: usize,
    pub tasks: TaskStats,
    pub worker_count: usize,
    pub workers: Vec<String>,
    pub timestamp: Timestamp,
}

/// GET /status -- queue size, task counts, and registered worker ids.
pub async fn get_overview(State(state): State<AppState>) -> Json<DispatcherOverview> {
    let queue_size = state.tasks.queue_len().await;
    let tasks = state.tasks.stats().await;
    let workers = state.workers.snapshot().await;

    Json(DispatcherOverview {
        queue_size,
        tasks,
        worker_count: workers.count,
        workers: workers.ids,
        timestamp: chrono::Utc::now(),
    })
}
