//! Handlers for design submission.
//!
//! Provides:
//! - `POST /design` to queue a new design task.
//! - `POST /design/{task_id}/retry` to re-submit a failed task as a new one.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use teeforge_core::error::CoreError;
use teeforge_core::task::TaskStatus;
use teeforge_core::types::{Payload, TaskId};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Maximum accepted prompt length, in characters.
const MAX_PROMPT_LEN: usize = 2000;

/// Body of `POST /design`.
///
/// `prompt` is required; any other fields are kept verbatim and handed to
/// the worker alongside it.
#[derive(Debug, Deserialize)]
pub struct DesignRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub extra: Payload,
}

impl DesignRequest {
    fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("Prompt must not be empty".into()));
        }
        if self.prompt.chars().count() > MAX_PROMPT_LEN {
            return Err(CoreError::Validation(format!(
                "Prompt must not exceed {MAX_PROMPT_LEN} characters"
            )));
        }
        Ok(())
    }

    fn into_payload(self) -> Payload {
        let mut payload = self.extra;
        payload.insert("prompt".into(), self.prompt.into());
        payload
    }
}

/// Response for accepted submissions.
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<TaskId>,
}

/// Queue a new design task.
pub async fn create_design(
    State(state): State<AppState>,
    body: Result<Json<DesignRequest>, JsonRejection>,
) -> AppResult<Json<TaskAccepted>> {
    let Json(input) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    input.validate()?;

    let task_id = state.tasks.create_task(input.into_payload()).await?;
    tracing::info!(task_id = %task_id, "Created design task");

    Ok(Json(TaskAccepted {
        task_id,
        status: TaskStatus::Pending,
        retry_of: None,
    }))
}

/// Re-submit a failed task. The original keeps its `failed` status.
pub async fn retry_design(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<TaskAccepted>> {
    let new_id = state.tasks.retry(&task_id).await?;

    Ok(Json(TaskAccepted {
        task_id: new_id,
        status: TaskStatus::Pending,
        retry_of: Some(task_id),
    }))
}
