//! In-memory task store.
//!
//! [`TaskStore`] owns every task record, the [`PendingQueue`] and the set of
//! in-flight task ids behind a single async mutex. All lifecycle changes go
//! through its methods; callers only ever receive [`TaskSnapshot`] copies.
//!
//! Dispatch uses [`TaskStore::claim_next`], which pops the queue head and
//! marks the task `processing` under one lock acquisition, so a task can
//! neither be handed to two workers nor dropped between the two steps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::queue::PendingQueue;
use crate::task::{Task, TaskSnapshot, TaskStatus};
use crate::types::{Payload, TaskId, Timestamp};

/// Processing deadline applied when none is configured: 5 minutes.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// How many fresh ids are tried before creation gives up.
const MAX_ID_ATTEMPTS: usize = 8;

/// A task popped from the queue and handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub request: Payload,
}

/// Per-status task counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    pending: PendingQueue,
    in_flight: HashSet<TaskId>,
}

pub struct TaskStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    timeout: chrono::Duration,
}

impl TaskStore {
    /// Create a store on the system clock with the given processing deadline.
    pub fn new(timeout: std::time::Duration) -> Self {
        Self::with_clock(timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(timeout: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TASK_TIMEOUT_SECS as i64));
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            timeout,
        }
    }

    /// The processing deadline.
    pub fn timeout(&self) -> chrono::Duration {
        self.timeout
    }

    /// Store a new `pending` task and append it to the queue.
    pub async fn create_task(&self, request: Payload) -> Result<TaskId, CoreError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let id = insert_pending(&mut inner, request, None, now)?;
        tracing::info!(task_id = %id, "Added task to queue");
        Ok(id)
    }

    /// Snapshot of a task, applying the lazy timeout check first.
    ///
    /// A task that has been `processing` for longer than the deadline is
    /// failed here, with `completed_at` set to the time of this read.
    pub async fn get_status(&self, id: &str) -> Result<TaskSnapshot, CoreError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let Inner {
            tasks, in_flight, ..
        } = &mut *inner;

        let task = tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::task_not_found(id))?;

        if task.is_overdue(now, self.timeout) {
            task.fail_timed_out(not_before(now, task.started_at));
            in_flight.remove(id);
            tracing::warn!(task_id = %id, "Task timed out (detected on status read)");
        }

        Ok(task.snapshot())
    }

    /// Apply a status change reported by the dispatch layer.
    ///
    /// `processing` stamps `started_at` and takes the task out of the queue;
    /// a terminal status stamps `completed_at` and stores `result` when one
    /// is given. Anything but a forward move is rejected and leaves the task
    /// untouched.
    pub async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Payload>,
    ) -> Result<TaskSnapshot, CoreError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let Inner {
            tasks,
            pending,
            in_flight,
        } = &mut *inner;

        let task = tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::task_not_found(id))?;

        if !task.status.can_transition_to(status) {
            return Err(CoreError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to: status,
            });
        }

        match status {
            TaskStatus::Processing => {
                if task.started_at.is_none() {
                    task.started_at = Some(not_before(now, Some(task.created_at)));
                }
                pending.remove(id);
                in_flight.insert(task.id.clone());
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                task.completed_at = Some(not_before(now, task.started_at));
                if result.is_some() {
                    task.result = result;
                }
                in_flight.remove(id);
            }
            TaskStatus::Pending => {}
        }
        task.status = status;

        tracing::info!(task_id = %id, status = %status, "Updated task status");
        Ok(task.snapshot())
    }

    /// Pop the oldest pending task and mark it `processing`.
    ///
    /// Returns `None` when nothing is waiting.
    pub async fn claim_next(&self) -> Option<ClaimedTask> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let Inner {
            tasks,
            pending,
            in_flight,
        } = &mut *inner;

        while let Some(id) = pending.dequeue() {
            let Some(task) = tasks.get_mut(&id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            task.status = TaskStatus::Processing;
            task.started_at = Some(not_before(now, Some(task.created_at)));
            in_flight.insert(id.clone());

            tracing::info!(task_id = %id, "Task moved to processing");
            return Some(ClaimedTask {
                id,
                request: task.request.clone(),
            });
        }

        None
    }

    /// Re-submit a failed task as a new `pending` task.
    ///
    /// The failed task keeps its terminal state; the new one records it in
    /// `retry_of`.
    pub async fn retry(&self, id: &str) -> Result<TaskId, CoreError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();

        let task = inner
            .tasks
            .get(id)
            .ok_or_else(|| CoreError::task_not_found(id))?;
        if task.status != TaskStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "Task {id} is {}; only failed tasks can be retried",
                task.status
            )));
        }
        let request = task.request.clone();

        let new_id = insert_pending(&mut inner, request, Some(id.to_string()), now)?;
        tracing::info!(task_id = %new_id, retry_of = %id, "Re-submitted failed task");
        Ok(new_id)
    }

    /// Fail every in-flight task that is past the deadline.
    ///
    /// Returns the ids that were failed by this sweep.
    pub async fn sweep_timed_out(&self) -> Vec<TaskId> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let Inner {
            tasks, in_flight, ..
        } = &mut *inner;

        let mut reaped = Vec::new();
        in_flight.retain(|id| {
            let Some(task) = tasks.get_mut(id) else {
                return false;
            };
            if !task.is_overdue(now, self.timeout) {
                return true;
            }
            task.fail_timed_out(not_before(now, task.started_at));
            reaped.push(id.clone());
            false
        });

        for id in &reaped {
            tracing::warn!(task_id = %id, "Task timed out (reaped by sweep)");
        }
        reaped
    }

    /// Number of tasks waiting in the queue.
    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn stats(&self) -> TaskStats {
        let inner = self.inner.lock().await;
        let mut stats = TaskStats {
            total: inner.tasks.len(),
            ..TaskStats::default()
        };
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS))
    }
}

fn insert_pending(
    inner: &mut Inner,
    request: Payload,
    retry_of: Option<TaskId>,
    now: Timestamp,
) -> Result<TaskId, CoreError> {
    let id = (0..MAX_ID_ATTEMPTS)
        .map(|_| uuid::Uuid::new_v4().to_string())
        .find(|candidate| !inner.tasks.contains_key(candidate))
        .ok_or_else(|| CoreError::Internal("could not allocate a unique task id".into()))?;

    let mut task = Task::new(id.clone(), request, now);
    task.retry_of = retry_of;
    inner.tasks.insert(id.clone(), task);
    inner.pending.enqueue(id.clone());
    Ok(id)
}

/// Clamp `now` so stamps never precede an earlier lifecycle stamp.
fn not_before(now: Timestamp, earlier: Option<Timestamp>) -> Timestamp {
    match earlier {
        Some(earlier) if earlier > now => earlier,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::task::TIMEOUT_ERROR;

    fn prompt(text: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("prompt".into(), serde_json::Value::String(text.into()));
        payload
    }

    fn store_with_clock() -> (TaskStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = TaskStore::with_clock(Duration::from_secs(300), clock.clone());
        (store, clock)
    }

    fn completed_result() -> Payload {
        let mut payload = Payload::new();
        payload.insert("image_url".into(), "/images/t.png".into());
        payload
    }

    // -- create / get --------------------------------------------------------

    #[tokio::test]
    async fn new_task_is_pending_without_result() {
        let store = TaskStore::default();
        let id = store.create_task(prompt("x")).await.unwrap();

        let snapshot = store.get_status(&id).await.unwrap();
        assert_eq!(snapshot.task_id, id);
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert!(snapshot.started_at.is_none());
        assert!(snapshot.completed_at.is_none());
        assert!(snapshot.result.is_none());
        assert_eq!(store.queue_len().await, 1);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let store = TaskStore::default();
        let err = store.get_status("unknown-id").await.unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "Task", .. });
    }

    #[tokio::test]
    async fn concurrent_creates_yield_distinct_ids() {
        let store = Arc::new(TaskStore::default());
        let handles: Vec<_> = (0..200)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create_task(prompt(&i.to_string())).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 200);
        assert_eq!(store.queue_len().await, 200);
    }

    // -- claim ---------------------------------------------------------------

    #[tokio::test]
    async fn claim_serves_tasks_in_submission_order() {
        let store = TaskStore::default();
        let mut submitted = Vec::new();
        for i in 0..5 {
            submitted.push(store.create_task(prompt(&i.to_string())).await.unwrap());
        }

        let mut claimed = Vec::new();
        while let Some(task) = store.claim_next().await {
            claimed.push(task.id);
        }
        assert_eq!(claimed, submitted);
        assert!(store.claim_next().await.is_none());
    }

    #[tokio::test]
    async fn claim_marks_processing_and_carries_request() {
        let (store, clock) = store_with_clock();
        let id = store.create_task(prompt("a cat")).await.unwrap();
        clock.advance(chrono::Duration::seconds(2));

        let claimed = store.claim_next().await.unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.request["prompt"], "a cat");

        let snapshot = store.get_status(&id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Processing);
        assert_eq!(snapshot.started_at, Some(clock.now()));
        assert_eq!(store.queue_len().await, 0);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_task() {
        let store = Arc::new(TaskStore::default());
        for i in 0..50 {
            store.create_task(prompt(&i.to_string())).await.unwrap();
        }

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.claim_next().await })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut claimed = 0;
        for handle in handles {
            if let Some(task) = handle.await.unwrap() {
                claimed += 1;
                assert!(seen.insert(task.id), "task handed out twice");
            }
        }
        assert_eq!(claimed, 50);
    }

    // -- update --------------------------------------------------------------

    #[tokio::test]
    async fn completing_stores_result_and_timestamps_in_order() {
        let (store, clock) = store_with_clock();
        let id = store.create_task(prompt("x")).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        store.claim_next().await.unwrap();
        clock.advance(chrono::Duration::seconds(1));

        let snapshot = store
            .update_status(&id, TaskStatus::Completed, Some(completed_result()))
            .await
            .unwrap();

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result, Some(completed_result()));
        let started = snapshot.started_at.unwrap();
        let completed = snapshot.completed_at.unwrap();
        assert!(snapshot.created_at <= started);
        assert!(started <= completed);
    }

    #[tokio::test]
    async fn terminal_tasks_reject_every_further_transition() {
        let store = TaskStore::default();
        let id = store.create_task(prompt("x")).await.unwrap();
        store.claim_next().await.unwrap();
        store
            .update_status(&id, TaskStatus::Completed, None)
            .await
            .unwrap();

        for next in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let err = store.update_status(&id, next, None).await.unwrap_err();
            assert_matches!(
                err,
                CoreError::InvalidTransition {
                    from: TaskStatus::Completed,
                    ..
                }
            );
        }
        assert_eq!(
            store.get_status(&id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn pending_task_cannot_jump_to_terminal() {
        let store = TaskStore::default();
        let id = store.create_task(prompt("x")).await.unwrap();

        let err = store
            .update_status(&id, TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::InvalidTransition { .. });
        assert_eq!(store.queue_len().await, 1);
    }

    #[tokio::test]
    async fn manual_processing_update_takes_task_out_of_queue() {
        let store = TaskStore::default();
        let first = store.create_task(prompt("1")).await.unwrap();
        let second = store.create_task(prompt("2")).await.unwrap();

        store
            .update_status(&first, TaskStatus::Processing, None)
            .await
            .unwrap();

        assert_eq!(store.queue_len().await, 1);
        assert_eq!(store.claim_next().await.unwrap().id, second);
    }

    #[tokio::test]
    async fn update_unknown_task_is_not_found() {
        let store = TaskStore::default();
        let err = store
            .update_status("nope", TaskStatus::Failed, None)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFound { .. });
    }

    // -- timeouts ------------------------------------------------------------

    #[tokio::test]
    async fn status_read_fails_task_past_deadline() {
        let (store, clock) = store_with_clock();
        let id = store.create_task(prompt("x")).await.unwrap();
        store.claim_next().await.unwrap();
        let started = clock.now();

        clock.advance(chrono::Duration::seconds(300));
        assert_eq!(
            store.get_status(&id).await.unwrap().status,
            TaskStatus::Processing
        );

        clock.advance(chrono::Duration::seconds(1));
        let snapshot = store.get_status(&id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.result.unwrap()["error"], TIMEOUT_ERROR);
        assert_eq!(
            snapshot.completed_at,
            Some(started + chrono::Duration::seconds(301))
        );
    }

    #[tokio::test]
    async fn late_result_after_timeout_is_rejected() {
        let (store, clock) = store_with_clock();
        let id = store.create_task(prompt("x")).await.unwrap();
        store.claim_next().await.unwrap();
        clock.advance(chrono::Duration::seconds(400));
        store.get_status(&id).await.unwrap();

        let err = store
            .update_status(&id, TaskStatus::Completed, Some(completed_result()))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            CoreError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Completed,
                ..
            }
        );
    }

    #[tokio::test]
    async fn sweep_fails_only_overdue_tasks() {
        let (store, clock) = store_with_clock();
        let old = store.create_task(prompt("old")).await.unwrap();
        store.claim_next().await.unwrap();

        clock.advance(chrono::Duration::seconds(200));
        let fresh = store.create_task(prompt("fresh")).await.unwrap();
        store.claim_next().await.unwrap();
        let waiting = store.create_task(prompt("waiting")).await.unwrap();

        clock.advance(chrono::Duration::seconds(150));
        let reaped = store.sweep_timed_out().await;

        assert_eq!(reaped, vec![old.clone()]);
        assert_eq!(store.get_status(&old).await.unwrap().status, TaskStatus::Failed);
        assert_eq!(
            store.get_status(&fresh).await.unwrap().status,
            TaskStatus::Processing
        );
        assert_eq!(
            store.get_status(&waiting).await.unwrap().status,
            TaskStatus::Pending
        );
        assert!(store.sweep_timed_out().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_ignores_completed_tasks() {
        let (store, clock) = store_with_clock();
        let id = store.create_task(prompt("x")).await.unwrap();
        store.claim_next().await.unwrap();
        store
            .update_status(&id, TaskStatus::Completed, None)
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(1000));
        assert!(store.sweep_timed_out().await.is_empty());
        assert_eq!(
            store.get_status(&id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    // -- retry / stats -------------------------------------------------------

    #[tokio::test]
    async fn retry_creates_new_task_referencing_failed_one() {
        let store = TaskStore::default();
        let id = store.create_task(prompt("x")).await.unwrap();
        store.claim_next().await.unwrap();
        store
            .update_status(&id, TaskStatus::Failed, None)
            .await
            .unwrap();

        let retry_id = store.retry(&id).await.unwrap();
        assert_ne!(retry_id, id);

        let retried = store.get_status(&retry_id).await.unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.retry_of.as_deref(), Some(id.as_str()));
        assert_eq!(store.get_status(&id).await.unwrap().status, TaskStatus::Failed);

        let claimed = store.claim_next().await.unwrap();
        assert_eq!(claimed.id, retry_id);
        assert_eq!(claimed.request["prompt"], "x");
    }

    #[tokio::test]
    async fn retry_of_non_failed_task_conflicts() {
        let store = TaskStore::default();
        let id = store.create_task(prompt("x")).await.unwrap();

        assert_matches!(store.retry(&id).await, Err(CoreError::Conflict(_)));
        assert_matches!(store.retry("missing").await, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn stats_count_each_status() {
        let store = TaskStore::default();
        let a = store.create_task(prompt("a")).await.unwrap();
        let b = store.create_task(prompt("b")).await.unwrap();
        store.create_task(prompt("c")).await.unwrap();
        store.create_task(prompt("d")).await.unwrap();
        store.claim_next().await.unwrap();
        store.claim_next().await.unwrap();
        store.claim_next().await.unwrap();
        store
            .update_status(&a, TaskStatus::Completed, None)
            .await
            .unwrap();
        store
            .update_status(&b, TaskStatus::Failed, None)
            .await
            .unwrap();

        assert_eq!(
            store.stats().await,
            TaskStats {
                total: 4,
                pending: 1,
                processing: 1,
                completed: 1,
                failed: 1,
            }
        );
    }
}
