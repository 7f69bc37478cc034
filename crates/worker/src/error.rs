use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Gave up after {0} consecutive connection failures")]
    RetriesExhausted(u32),
}
