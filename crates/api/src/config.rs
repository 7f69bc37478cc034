use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use teeforge_core::store::DEFAULT_TASK_TIMEOUT_SECS;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    /// A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background jobs to stop after the listener closes.
    pub shutdown_timeout_secs: u64,
    /// How long a task may stay `processing` before it is failed.
    pub task_timeout_secs: u64,
    /// Interval between timeout reaper sweeps.
    pub reaper_interval_secs: u64,
    /// Interval between WebSocket Ping rounds to connected workers.
    pub heartbeat_interval_secs: u64,
    /// Directory that worker-uploaded images are written to and served from.
    pub images_dir: PathBuf,
    /// Send a Close frame to a worker connection that is superseded by a
    /// re-registration under the same `worker_id`.
    pub close_superseded_workers: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default   |
    /// |----------------------------|-----------|
    /// | `HOST`                     | `0.0.0.0` |
    /// | `PORT`                     | `8000`    |
    /// | `CORS_ORIGINS`             | `*`       |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`      |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`      |
    /// | `TASK_TIMEOUT_SECS`        | `300`     |
    /// | `REAPER_INTERVAL_SECS`     | `30`      |
    /// | `HEARTBEAT_INTERVAL_SECS`  | `30`      |
    /// | `IMAGES_DIR`               | `outputs` |
    /// | `CLOSE_SUPERSEDED_WORKERS` | `false`   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let images_dir = std::env::var("IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("outputs"));

        Self {
            host,
            port: parse_env("PORT", 8000),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 30),
            task_timeout_secs: parse_env("TASK_TIMEOUT_SECS", DEFAULT_TASK_TIMEOUT_SECS),
            reaper_interval_secs: parse_env("REAPER_INTERVAL_SECS", 30),
            heartbeat_interval_secs: parse_env("HEARTBEAT_INTERVAL_SECS", 30),
            images_dir,
            close_superseded_workers: parse_env("CLOSE_SUPERSEDED_WORKERS", false),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec!["*".into()],
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            reaper_interval_secs: 30,
            heartbeat_interval_secs: 30,
            images_dir: PathBuf::from("outputs"),
            close_superseded_workers: false,
        }
    }
}

/// Read and parse an env var, falling back to `default` when unset.
///
/// Panics on a value that does not parse; misconfiguration should fail
/// fast at startup.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
