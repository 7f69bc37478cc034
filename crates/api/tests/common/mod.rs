#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use teeforge_api::artifacts::LocalArtifactStore;
use teeforge_api::config::ServerConfig;
use teeforge_api::router::build_app_router;
use teeforge_api::state::AppState;
use teeforge_core::clock::ManualClock;
use teeforge_core::store::TaskStore;

/// Task deadline used by tests, matching the production default.
pub const TEST_TIMEOUT_SECS: u64 = 300;

/// Build a test `ServerConfig` with safe defaults, serving images from
/// `images_dir`.
pub fn test_config(images_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        task_timeout_secs: TEST_TIMEOUT_SECS,
        reaper_interval_secs: 30,
        heartbeat_interval_secs: 30,
        images_dir: images_dir.to_path_buf(),
        close_superseded_workers: false,
    }
}

/// Everything a test needs to drive the app and inspect its state.
pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub config: ServerConfig,
    /// Keeps the images directory alive for the duration of the test.
    pub images: tempfile::TempDir,
}

impl TestApp {
    /// A fresh router over the shared state. Routers are consumed by
    /// `oneshot`, so build one per request.
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &self.config)
    }
}

/// Build the full application with a manual clock and a temporary images
/// directory.
pub fn build_test_app() -> TestApp {
    build_test_app_with(|_| {})
}

/// Like [`build_test_app`], with a hook to adjust the config first.
pub fn build_test_app_with(adjust: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let images = tempfile::tempdir().expect("create temp images dir");
    let mut config = test_config(images.path());
    adjust(&mut config);

    let clock = Arc::new(ManualClock::default());
    let tasks = Arc::new(TaskStore::with_clock(
        Duration::from_secs(config.task_timeout_secs),
        clock.clone(),
    ));
    let artifacts = Arc::new(LocalArtifactStore::new(config.images_dir.clone()));
    let state = AppState::new(config.clone(), tasks, artifacts);

    TestApp {
        state,
        clock,
        config,
        images,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
