//! Task model and lifecycle rules.
//!
//! A task moves strictly forward: `pending -> processing -> {completed,
//! failed}`. [`TaskStatus::can_transition_to`] is the single source of truth
//! for which moves are legal; the store refuses everything else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Payload, TaskId, Timestamp};

/// Error message stored on tasks force-failed by the processing deadline.
pub const TIMEOUT_ERROR: &str = "Task timed out";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a task in `self` may move to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record of one unit of submitted work.
///
/// Only the store mutates a `Task`; everything outside it sees
/// [`TaskSnapshot`] copies.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub request: Payload,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub result: Option<Payload>,
    /// Set when this task re-submits a failed one.
    pub retry_of: Option<TaskId>,
}

impl Task {
    pub fn new(id: TaskId, request: Payload, created_at: Timestamp) -> Self {
        Self {
            id,
            request,
            status: TaskStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            retry_of: None,
        }
    }

    /// Whether the task has been processing for longer than `timeout` at `now`.
    pub fn is_overdue(&self, now: Timestamp, timeout: chrono::Duration) -> bool {
        self.status == TaskStatus::Processing
            && self
                .started_at
                .is_some_and(|started| now - started > timeout)
    }

    /// Force the task into `failed` with the synthetic timeout error.
    pub(crate) fn fail_timed_out(&mut self, now: Timestamp) {
        self.status = TaskStatus::Failed;
        self.result = Some(error_payload(TIMEOUT_ERROR));
        self.completed_at = Some(now);
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            retry_of: self.retry_of.clone(),
        }
    }
}

/// Immutable, serializable view of a task as returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub result: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<TaskId>,
}

/// Build an `{"error": message}` payload.
pub fn error_payload(message: impl Into<String>) -> Payload {
    let mut payload = Payload::new();
    payload.insert("error".into(), serde_json::Value::String(message.into()));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    #[test]
    fn only_forward_transitions_are_allowed() {
        let allowed: Vec<(TaskStatus, TaskStatus)> = ALL
            .iter()
            .flat_map(|&from| ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| from.can_transition_to(to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (TaskStatus::Pending, TaskStatus::Processing),
                (TaskStatus::Processing, TaskStatus::Completed),
                (TaskStatus::Processing, TaskStatus::Failed),
            ]
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn snapshot_omits_retry_of_when_absent() {
        let task = Task::new("t-1".into(), Payload::new(), chrono::Utc::now());
        let json = serde_json::to_value(task.snapshot()).unwrap();

        assert_eq!(json["task_id"], "t-1");
        assert_eq!(json["status"], "pending");
        assert!(json["result"].is_null());
        assert!(json["started_at"].is_null());
        assert!(json.get("retry_of").is_none());
    }

    #[test]
    fn overdue_requires_processing_past_deadline() {
        let now = chrono::Utc::now();
        let timeout = chrono::Duration::seconds(300);
        let mut task = Task::new("t-1".into(), Payload::new(), now);
        assert!(!task.is_overdue(now + chrono::Duration::seconds(1000), timeout));

        task.status = TaskStatus::Processing;
        task.started_at = Some(now);
        assert!(!task.is_overdue(now + timeout, timeout));
        assert!(task.is_overdue(now + chrono::Duration::seconds(301), timeout));
    }
}
