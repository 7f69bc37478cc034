//! `teeforge-api` -- design task dispatcher.
//!
//! Serves the client HTTP API and the worker WebSocket endpoint, runs the
//! timeout reaper and worker heartbeat, and serves uploaded images.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teeforge_api::artifacts::LocalArtifactStore;
use teeforge_api::background::timeout_reaper;
use teeforge_api::config::ServerConfig;
use teeforge_api::router::build_app_router;
use teeforge_api::state::AppState;
use teeforge_api::ws;
use teeforge_core::store::TaskStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        task_timeout_secs = config.task_timeout_secs,
        reaper_interval_secs = config.reaper_interval_secs,
        heartbeat_interval_secs = config.heartbeat_interval_secs,
        images_dir = %config.images_dir.display(),
        "Loaded server configuration"
    );

    tokio::fs::create_dir_all(&config.images_dir)
        .await
        .expect("Failed to create images directory");

    let tasks = Arc::new(TaskStore::new(config.task_timeout()));
    let artifacts = Arc::new(LocalArtifactStore::new(config.images_dir.clone()));
    let state = AppState::new(config.clone(), tasks, artifacts);
    let workers = Arc::clone(&state.workers);

    let heartbeat = ws::start_heartbeat(Arc::clone(&workers), config.heartbeat_interval());
    let reaper_cancel = CancellationToken::new();
    let reaper = tokio::spawn(timeout_reaper::run(
        Arc::clone(&state.tasks),
        config.reaper_interval(),
        reaper_cancel.clone(),
    ));

    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(%addr, "Dispatcher listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Listener closed, stopping background work");
    stop_reaper(reaper_cancel, reaper, config.shutdown_timeout_secs).await;

    tracing::info!(
        worker_count = workers.worker_count().await,
        "Closing worker connections"
    );
    workers.shutdown_all().await;
    heartbeat.abort();

    tracing::info!("Shutdown complete");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "teeforge_api=debug,teeforge_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn stop_reaper(cancel: CancellationToken, handle: JoinHandle<()>, timeout_secs: u64) {
    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(timeout_secs), handle)
        .await
        .is_err()
    {
        tracing::warn!(timeout_secs, "Timeout reaper did not stop in time");
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
