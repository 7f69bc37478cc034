//! Worker WebSocket infrastructure.
//!
//! Provides the worker registry, the dispatch protocol handler, heartbeat
//! pings, and the HTTP upgrade handler used by Axum routes.

pub mod dispatch;
mod handler;
mod heartbeat;
pub mod registry;

pub use dispatch::{Dispatcher, WorkerSession};
pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use registry::WorkerRegistry;
