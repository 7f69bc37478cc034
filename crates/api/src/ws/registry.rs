use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use serde::Serialize;
use teeforge_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// A registered worker's live connection.
#[derive(Debug, Clone)]
pub struct WorkerConnection {
    /// Server-assigned id of the underlying WebSocket connection.
    pub conn_id: String,
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    /// When the worker registered on this connection.
    pub connected_at: Timestamp,
}

/// Read-only diagnostic view of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub count: usize,
    /// Registered worker ids, sorted.
    pub ids: Vec<String>,
}

/// Tracks connected workers by their self-reported `worker_id`.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. A registration under an id that is
/// already present replaces the previous entry (last write wins).
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerConnection>>,
}

impl WorkerRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `worker_id` on connection `conn_id`.
    ///
    /// Returns the entry that was replaced, if any, so the caller can decide
    /// what to do with the superseded connection.
    pub async fn register(
        &self,
        worker_id: String,
        conn_id: String,
        sender: WsSender,
    ) -> Option<WorkerConnection> {
        let conn = WorkerConnection {
            conn_id,
            sender,
            connected_at: chrono::Utc::now(),
        };
        self.workers.write().await.insert(worker_id, conn)
    }

    /// Remove `worker_id`, but only while it is still registered on
    /// `conn_id`. A stale connection closing after a same-id reconnect must
    /// not evict the newer registration.
    ///
    /// Returns whether an entry was removed.
    pub async fn unregister(&self, worker_id: &str, conn_id: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get(worker_id) {
            Some(conn) if conn.conn_id == conn_id => {
                workers.remove(worker_id);
                true
            }
            _ => false,
        }
    }

    /// Whether `worker_id` is currently registered on `conn_id`.
    pub async fn is_current(&self, worker_id: &str, conn_id: &str) -> bool {
        self.workers
            .read()
            .await
            .get(worker_id)
            .is_some_and(|conn| conn.conn_id == conn_id)
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let workers = self.workers.read().await;
        let mut ids: Vec<String> = workers.keys().cloned().collect();
        ids.sort();
        RegistrySnapshot {
            count: ids.len(),
            ids,
        }
    }

    /// Return the current number of registered workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Send a Ping frame to every registered worker.
    ///
    /// Closed channels are skipped; their receive loops clean them up.
    pub async fn ping_all(&self) {
        let workers = self.workers.read().await;
        for conn in workers.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Send a Close frame to every registered worker, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut workers = self.workers.write().await;
        let count = workers.len();
        for conn in workers.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        workers.clear();
        tracing::info!(count, "Closed all worker connections");
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
