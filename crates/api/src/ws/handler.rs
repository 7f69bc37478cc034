use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use teeforge_core::protocol::ServerMessage;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::dispatch::{Dispatcher, WorkerSession};

/// HTTP handler that upgrades a worker connection to WebSocket.
///
/// After the upgrade the connection is served by two tasks: a sender that
/// drains the connection's outbound channel, and the receive loop that
/// feeds inbound frames to the [`Dispatcher`].
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.dispatcher))
}

/// Manage a single worker connection after upgrade.
///
///   1. Creates the outbound channel and the connection's session.
///   2. Spawns a sender task that forwards channel messages to the sink.
///   3. Processes inbound messages on the current task.
///   4. Unregisters the worker (if still current) on disconnect.
async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Worker WebSocket connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut session = WorkerSession::new(conn_id.clone(), tx);

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Receiver loop: process inbound messages.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = dispatcher.handle_text(&mut session, text.as_str()).await {
                    send_reply(&session, &reply);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {
                // Binary / Ping -- not part of the protocol.
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: drop the registration and abort the sender task.
    dispatcher.disconnect(&session).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "Worker WebSocket disconnected");
}

/// Serialize a reply and queue it on the session's outbound channel.
fn send_reply(session: &WorkerSession, reply: &ServerMessage) {
    match serde_json::to_string(reply) {
        Ok(json) => {
            if session.sender.send(Message::Text(json.into())).is_err() {
                tracing::debug!(conn_id = %session.conn_id, "Reply dropped; sender closed");
            }
        }
        Err(e) => {
            tracing::error!(conn_id = %session.conn_id, error = %e, "Failed to encode reply");
        }
    }
}
