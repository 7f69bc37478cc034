//! Worker WebSocket protocol.
//!
//! JSON text frames discriminated by a `type` field, shared by the api
//! server and the worker client.
//!
//! ```text
//! worker -> server   {"type":"connect","worker_id":"w1"}
//! server -> worker   {"type":"connected","status":"ok"}
//! worker -> server   {"type":"worker_status", ...}              (poll)
//! server -> worker   {"type":"task","data":{"id":"..", ...request}}
//! worker -> server   {"type":"result","task_id":"..","status":"completed", ...}
//! ```
//!
//! Unknown `type` values decode to [`WorkerMessage::Unknown`] and are ignored
//! by the server.

use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;
use crate::types::{Payload, TaskId};

/// Acknowledgement status sent back on a successful `connect`.
pub const CONNECTED_OK: &str = "ok";

/// Reported status string for a successful result.
pub const RESULT_COMPLETED: &str = "completed";

/// Reported status string for a failed result.
pub const RESULT_FAILED: &str = "failed";

/// Error stored when a worker reports failure without a message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Messages a worker sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Registration. Must precede polling on a connection.
    Connect {
        worker_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    /// Poll for work; sent whenever the worker is idle.
    WorkerStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<serde_json::Value>,
    },
    /// Outcome of an assigned task.
    Result(ResultMessage),
    #[serde(other)]
    Unknown,
}

/// Outcome of an assigned task as reported by a worker.
///
/// `image_data` carries the base64-encoded artifact; the server persists it
/// under `image_name` and substitutes a retrieval URL into the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task_id: TaskId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
}

impl ResultMessage {
    /// Anything other than `"completed"` counts as a failure.
    pub fn reported_status(&self) -> TaskStatus {
        if self.status == RESULT_COMPLETED {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }
}

/// Messages the server sends to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { status: String },
    Task { data: TaskAssignment },
}

/// A task handed to a worker: its id plus the client's request fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: TaskId,
    #[serde(flatten)]
    pub request: Payload,
}

impl TaskAssignment {
    /// Build an assignment. A client-supplied `id` field is dropped so it
    /// cannot shadow the task id on the wire.
    pub fn new(id: TaskId, mut request: Payload) -> Self {
        request.remove("id");
        Self { id, request }
    }

    /// The `prompt` field, or an empty string.
    pub fn prompt(&self) -> &str {
        self.str_field("prompt").unwrap_or_default()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.request.get(key).and_then(|v| v.as_str())
    }
}
