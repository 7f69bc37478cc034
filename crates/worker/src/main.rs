//! `teeforge-worker` -- image generation worker.
//!
//! Connects to the teeforge dispatcher over WebSocket, polls for design
//! tasks, renders each one through the configured generator service, and
//! reports the result with the image attached.
//!
//! # Environment variables
//!
//! | Variable            | Required | Default                  | Description                          |
//! |---------------------|----------|--------------------------|--------------------------------------|
//! | `SERVER_URL`        | no       | `ws://127.0.0.1:8000/ws` | Dispatcher WebSocket endpoint        |
//! | `WORKER_ID`         | no       | `worker1`                | Id this worker registers under       |
//! | `GENERATOR_URL`     | yes      | --                       | HTTP endpoint that renders prompts   |
//! | `POLL_TIMEOUT_SECS` | no       | `5`                      | Wait for a task after each poll      |
//! | `MAX_RETRIES`       | no       | `5`                      | Consecutive reconnects before exit   |
//! | `OUTPUT_DIR`        | no       | --                       | Keep a local copy of each image      |

use teeforge_worker::client;
use teeforge_worker::config::WorkerConfig;
use teeforge_worker::generator::HttpGenerator;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teeforge_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        std::process::exit(1);
    });

    tracing::info!(
        worker_id = %config.worker_id,
        server_url = %config.server_url,
        generator_url = %config.generator_url,
        poll_timeout_secs = config.poll_timeout_secs,
        max_retries = config.max_retries,
        "Starting teeforge-worker",
    );

    let generator = HttpGenerator::new(config.generator_url.clone());

    tokio::select! {
        result = client::run(&config, &generator) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker exiting");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
    }
}
