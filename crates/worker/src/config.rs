use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::WorkerError;

/// Worker client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dispatcher WebSocket endpoint (default: `ws://127.0.0.1:8000/ws`).
    pub server_url: String,
    /// Self-reported worker id (default: `worker1`).
    pub worker_id: String,
    /// Image generation backend; required.
    pub generator_url: String,
    /// How long to wait for a task after each poll (default: 5).
    pub poll_timeout_secs: u64,
    /// Consecutive connection failures tolerated before giving up (default: 5).
    pub max_retries: u32,
    /// Optional directory for a local copy of every generated image.
    pub output_dir: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env var             | Default                   |
    /// |---------------------|---------------------------|
    /// | `SERVER_URL`        | `ws://127.0.0.1:8000/ws`  |
    /// | `WORKER_ID`         | `worker1`                 |
    /// | `GENERATOR_URL`     | (required)                |
    /// | `POLL_TIMEOUT_SECS` | `5`                       |
    /// | `MAX_RETRIES`       | `5`                       |
    /// | `OUTPUT_DIR`        | unset                     |
    pub fn from_env() -> Result<Self, WorkerError> {
        let generator_url = std::env::var("GENERATOR_URL")
            .map_err(|_| WorkerError::Config("GENERATOR_URL is required".into()))?;

        Ok(Self {
            server_url: std::env::var("SERVER_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8000/ws".into()),
            worker_id: std::env::var("WORKER_ID").unwrap_or_else(|_| "worker1".into()),
            generator_url,
            poll_timeout_secs: parse_env("POLL_TIMEOUT_SECS", 5)?,
            max_retries: parse_env("MAX_RETRIES", 5)?,
            output_dir: std::env::var("OUTPUT_DIR").ok().map(PathBuf::from),
        })
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, WorkerError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| WorkerError::Config(format!("{key} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
