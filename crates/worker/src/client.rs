//! Dispatcher connection and task loop.
//!
//! Connects to the dispatcher WebSocket endpoint, registers, then polls for
//! work whenever idle. Each assigned task is run through a [`Generator`] and
//! the outcome is sent back as a `result` message with the image attached.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use teeforge_core::protocol::{
    ResultMessage, ServerMessage, TaskAssignment, WorkerMessage, RESULT_COMPLETED, RESULT_FAILED,
};
use teeforge_core::types::Payload;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::generator::Generator;

/// Reconnect delay grows by this much per consecutive failure.
const BACKOFF_STEP_SECS: u64 = 5;

/// Upper bound on the reconnect delay.
const MAX_BACKOFF_SECS: u64 = 30;

/// How long to wait for the `connected` acknowledgement.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before reconnect attempt number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs((BACKOFF_STEP_SECS * u64::from(attempt)).min(MAX_BACKOFF_SECS))
}

/// Per-connection counters, reported with every poll.
#[derive(Debug, Default, Clone, Copy)]
struct SessionStats {
    completed: u64,
    failed: u64,
}

impl SessionStats {
    fn record(&mut self, result: &ResultMessage) {
        if result.status == RESULT_COMPLETED {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }

    fn to_status(self) -> Value {
        json!({
            "state": "idle",
            "tasks_completed": self.completed,
            "tasks_failed": self.failed,
        })
    }
}

/// Run the worker until the retry budget is exhausted.
///
/// Every session that ends, cleanly or not, counts as a failure; the counter
/// resets once a new connection completes its handshake.
pub async fn run(config: &WorkerConfig, generator: &dyn Generator) -> Result<(), WorkerError> {
    let mut failures: u32 = 0;

    loop {
        tracing::info!(url = %config.server_url, worker_id = %config.worker_id, "Connecting to dispatcher");

        match connect_and_serve(config, generator, &mut failures).await {
            Ok(()) => tracing::warn!("Dispatcher closed the connection"),
            Err(e) => tracing::error!(error = %e, "Worker session failed"),
        }

        failures += 1;
        if failures >= config.max_retries {
            tracing::error!(failures, "Max retries reached");
            return Err(WorkerError::RetriesExhausted(failures));
        }

        let delay = backoff_delay(failures);
        tracing::info!(attempt = failures, delay_secs = delay.as_secs(), "Reconnecting");
        tokio::time::sleep(delay).await;
    }
}

async fn connect_and_serve(
    config: &WorkerConfig,
    generator: &dyn Generator,
    failures: &mut u32,
) -> Result<(), WorkerError> {
    let (ws_stream, _response) = connect_async(config.server_url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    handshake(&mut sink, &mut stream, &config.worker_id).await?;
    *failures = 0;
    tracing::info!(worker_id = %config.worker_id, "Registered with dispatcher");

    poll_loop(&mut sink, &mut stream, config, generator).await
}

/// Send `connect` and wait for the acknowledgement.
async fn handshake<S, R>(sink: &mut S, stream: &mut R, worker_id: &str) -> Result<(), WorkerError>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let connect = WorkerMessage::Connect {
        worker_id: worker_id.to_string(),
        status: Some("ready".into()),
    };
    send_message(sink, &connect).await?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, next_server_message(stream)).await {
        Ok(Ok(Some(ServerMessage::Connected { status }))) => {
            tracing::debug!(status = %status, "Dispatcher acknowledged connection");
            Ok(())
        }
        Ok(Ok(Some(other))) => Err(WorkerError::Handshake(format!(
            "unexpected reply before acknowledgement: {other:?}"
        ))),
        Ok(Ok(None)) => Err(WorkerError::Handshake(
            "connection closed before acknowledgement".into(),
        )),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(WorkerError::Handshake(
            "timed out waiting for acknowledgement".into(),
        )),
    }
}

/// Poll, wait for a task, process it, repeat. Returns `Ok` when the
/// dispatcher closes the connection.
async fn poll_loop<S, R>(
    sink: &mut S,
    stream: &mut R,
    config: &WorkerConfig,
    generator: &dyn Generator,
) -> Result<(), WorkerError>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut stats = SessionStats::default();

    loop {
        let poll = WorkerMessage::WorkerStatus {
            worker_id: Some(config.worker_id.clone()),
            status: Some(stats.to_status()),
        };
        send_message(sink, &poll).await?;

        let msg = match tokio::time::timeout(config.poll_timeout(), next_server_message(stream)).await
        {
            // Nothing queued; poll again.
            Err(_) => continue,
            Ok(msg) => msg?,
        };

        match msg {
            Some(ServerMessage::Task { data }) => {
                let result = process_task(
                    generator,
                    &data,
                    &config.worker_id,
                    config.output_dir.as_deref(),
                )
                .await;
                stats.record(&result);
                send_message(sink, &WorkerMessage::Result(result)).await?;
            }
            Some(ServerMessage::Connected { .. }) => {
                tracing::debug!("Ignoring repeated acknowledgement");
            }
            None => return Ok(()),
        }
    }
}

/// Run one task through the generator and build the `result` message.
///
/// Generator errors become a `failed` result carrying the error text; this
/// never fails itself.
pub async fn process_task(
    generator: &dyn Generator,
    task: &TaskAssignment,
    worker_id: &str,
    output_dir: Option<&Path>,
) -> ResultMessage {
    tracing::info!(task_id = %task.id, "Processing task");

    let image = match generator.generate(task).await {
        Ok(image) => image,
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "Generation failed");
            return ResultMessage {
                task_id: task.id.clone(),
                status: RESULT_FAILED.into(),
                error: Some(e.to_string()),
                ..ResultMessage::default()
            };
        }
    };

    let now = Utc::now();
    let image_name = format!(
        "{}_{}.{}",
        task.id,
        now.format("%Y%m%d_%H%M%S"),
        image.extension
    );

    if let Some(dir) = output_dir {
        save_local_copy(dir, &image_name, &image.bytes).await;
    }

    let mut metadata = Payload::new();
    metadata.insert("timestamp".into(), Value::String(now.to_rfc3339()));
    metadata.insert("worker_id".into(), Value::String(worker_id.to_string()));
    metadata.insert("prompt".into(), Value::String(task.prompt().to_string()));

    tracing::info!(task_id = %task.id, image_name = %image_name, bytes = image.bytes.len(), "Task completed");

    ResultMessage {
        task_id: task.id.clone(),
        status: RESULT_COMPLETED.into(),
        image_data: Some(BASE64.encode(&image.bytes)),
        image_name: Some(image_name),
        metadata: Some(metadata),
        ..ResultMessage::default()
    }
}

/// Best-effort local copy; failures are logged, not reported.
async fn save_local_copy(dir: &Path, name: &str, bytes: &[u8]) {
    let path = dir.join(name);
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, bytes).await
    }
    .await;

    match written {
        Ok(()) => tracing::debug!(path = %path.display(), "Saved local image copy"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to save local image copy"),
    }
}

async fn send_message<S>(sink: &mut S, msg: &WorkerMessage) -> Result<(), WorkerError>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

/// Read frames until a decodable server message arrives.
///
/// Returns `Ok(None)` when the dispatcher closes the connection.
async fn next_server_message<R>(stream: &mut R) -> Result<Option<ServerMessage>, WorkerError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    tracing::warn!(error = %e, raw = %text, "Unknown or malformed server message");
                }
            },
            Message::Close(frame) => {
                tracing::info!(?frame, "Dispatcher closed WebSocket");
                return Ok(None);
            }
            _ => {
                // Ping / Pong are answered by tungstenite; binary is not used.
            }
        }
    }
    Ok(None)
}
