//! Worker protocol handling.
//!
//! [`Dispatcher`] turns decoded [`WorkerMessage`]s into task store and
//! registry operations and decides what (if anything) to send back. It
//! knows nothing about sockets: the WebSocket handler feeds it text frames
//! and forwards the returned [`ServerMessage`] on the same connection.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use teeforge_core::error::CoreError;
use teeforge_core::protocol::{
    ResultMessage, ServerMessage, TaskAssignment, WorkerMessage, CONNECTED_OK, UNKNOWN_ERROR,
};
use teeforge_core::store::TaskStore;
use teeforge_core::task::TaskStatus;
use teeforge_core::types::Payload;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::ws::registry::{WorkerRegistry, WsSender};

/// Per-connection protocol state.
#[derive(Debug)]
pub struct WorkerSession {
    /// Server-assigned connection id.
    pub conn_id: String,
    /// Set by the first `connect` on this connection.
    pub worker_id: Option<String>,
    /// Outbound channel for this connection.
    pub sender: WsSender,
}

impl WorkerSession {
    pub fn new(conn_id: String, sender: WsSender) -> Self {
        Self {
            conn_id,
            worker_id: None,
            sender,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error("Invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error(transparent)]
    Store(#[from] ArtifactError),
}

/// Applies worker messages to the shared task store and worker registry.
#[derive(Clone)]
pub struct Dispatcher {
    tasks: Arc<TaskStore>,
    workers: Arc<WorkerRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    close_superseded: bool,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<TaskStore>,
        workers: Arc<WorkerRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
        close_superseded: bool,
    ) -> Self {
        Self {
            tasks,
            workers,
            artifacts,
            close_superseded,
        }
    }

    /// Decode and handle one text frame. Malformed JSON is logged and
    /// dropped.
    pub async fn handle_text(
        &self,
        session: &mut WorkerSession,
        text: &str,
    ) -> Option<ServerMessage> {
        match serde_json::from_str::<WorkerMessage>(text) {
            Ok(msg) => self.handle_message(session, msg).await,
            Err(e) => {
                tracing::warn!(conn_id = %session.conn_id, error = %e, "Malformed worker message");
                None
            }
        }
    }

    /// Handle one decoded message and return the reply, if any.
    pub async fn handle_message(
        &self,
        session: &mut WorkerSession,
        msg: WorkerMessage,
    ) -> Option<ServerMessage> {
        match msg {
            WorkerMessage::Connect { worker_id, .. } => {
                self.connect(session, worker_id).await;
                Some(ServerMessage::Connected {
                    status: CONNECTED_OK.to_string(),
                })
            }
            WorkerMessage::WorkerStatus { .. } => self.poll(session).await,
            WorkerMessage::Result(result) => {
                self.record_result(session, result).await;
                None
            }
            WorkerMessage::Unknown => {
                tracing::debug!(conn_id = %session.conn_id, "Ignoring unknown message type");
                None
            }
        }
    }

    /// Drop the session's registration, unless a newer connection has taken
    /// over its worker id.
    pub async fn disconnect(&self, session: &WorkerSession) {
        let Some(worker_id) = session.worker_id.as_deref() else {
            return;
        };
        if self.workers.unregister(worker_id, &session.conn_id).await {
            tracing::info!(worker_id = %worker_id, conn_id = %session.conn_id, "Worker disconnected");
        } else {
            tracing::debug!(
                worker_id = %worker_id,
                conn_id = %session.conn_id,
                "Stale worker connection closed; newer registration kept",
            );
        }
    }

    async fn connect(&self, session: &mut WorkerSession, worker_id: String) {
        // Re-registering under a different id on the same connection releases
        // the old id.
        if let Some(previous_id) = session.worker_id.as_deref() {
            if previous_id != worker_id {
                self.workers.unregister(previous_id, &session.conn_id).await;
            }
        }

        let superseded = self
            .workers
            .register(
                worker_id.clone(),
                session.conn_id.clone(),
                session.sender.clone(),
            )
            .await;

        if let Some(previous) = superseded.filter(|prev| prev.conn_id != session.conn_id) {
            tracing::warn!(
                worker_id = %worker_id,
                old_conn_id = %previous.conn_id,
                new_conn_id = %session.conn_id,
                "Worker id re-registered; previous connection superseded",
            );
            if self.close_superseded {
                let _ = previous
                    .sender
                    .send(axum::extract::ws::Message::Close(None));
            }
        }

        tracing::info!(worker_id = %worker_id, conn_id = %session.conn_id, "Worker connected");
        session.worker_id = Some(worker_id);
    }

    async fn poll(&self, session: &WorkerSession) -> Option<ServerMessage> {
        let Some(worker_id) = session.worker_id.as_deref() else {
            tracing::debug!(conn_id = %session.conn_id, "Poll before connect ignored");
            return None;
        };

        let claimed = self.tasks.claim_next().await?;
        tracing::info!(task_id = %claimed.id, worker_id = %worker_id, "Assigned task to worker");

        Some(ServerMessage::Task {
            data: TaskAssignment::new(claimed.id, claimed.request),
        })
    }

    async fn record_result(&self, session: &WorkerSession, msg: ResultMessage) {
        let task_id = msg.task_id.clone();

        // Only an in-flight task may accept a result; checked before the
        // upload so a rejected report never touches stored artifacts.
        match self.tasks.get_status(&task_id).await {
            Ok(snapshot) if snapshot.status == TaskStatus::Processing => {}
            Ok(snapshot) => {
                tracing::warn!(
                    task_id = %task_id,
                    status = %snapshot.status,
                    "Ignoring worker result for task that is not processing",
                );
                return;
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Ignoring worker result");
                return;
            }
        }

        let (status, result) = self.build_result(msg).await;

        match self.tasks.update_status(&task_id, status, Some(result)).await {
            Ok(_) => {
                tracing::info!(
                    task_id = %task_id,
                    status = %status,
                    worker_id = session.worker_id.as_deref().unwrap_or("-"),
                    "Recorded task result",
                );
            }
            Err(e @ (CoreError::InvalidTransition { .. } | CoreError::NotFound { .. })) => {
                tracing::warn!(task_id = %task_id, error = %e, "Ignoring worker result");
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to record worker result");
            }
        }
    }

    /// Assemble the stored result payload from a worker's report.
    ///
    /// An attached image is persisted and replaced by its URL. A failure
    /// always carries an `error` entry.
    async fn build_result(&self, msg: ResultMessage) -> (TaskStatus, Payload) {
        let mut status = msg.reported_status();
        let ResultMessage {
            task_id,
            result,
            error,
            image_data,
            image_name,
            metadata,
            ..
        } = msg;
        let mut result = result.unwrap_or_default();

        if let (Some(data), Some(name)) = (image_data, image_name) {
            match self.upload(&name, &data).await {
                Ok(url) => {
                    result.insert("image_url".into(), Value::String(url));
                    result.insert(
                        "metadata".into(),
                        Value::Object(metadata.unwrap_or_default()),
                    );
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to store task image");
                    status = TaskStatus::Failed;
                    result.insert("error".into(), Value::String(e.to_string()));
                }
            }
        }

        if status == TaskStatus::Failed && !result.contains_key("error") {
            let message = error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
            result.insert("error".into(), Value::String(message));
        }

        (status, result)
    }

    async fn upload(&self, name: &str, data: &str) -> Result<String, UploadError> {
        let bytes = BASE64.decode(data)?;
        Ok(self.artifacts.save(name, &bytes).await?)
    }
}
