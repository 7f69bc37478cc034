pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{design, status};
use crate::state::AppState;
use crate::ws;

/// Build the dispatcher route tree.
///
/// ```text
/// /ws                          worker WebSocket
/// /design                      submit (POST)
/// /design/{task_id}/retry      re-submit a failed task (POST)
/// /status                      queue + worker overview (GET)
/// /status/{task_id}            task snapshot (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/design", post(design::create_design))
        .route("/design/{task_id}/retry", post(design::retry_design))
        .route("/status", get(status::get_overview))
        .route("/status/{task_id}", get(status::get_task_status))
}
