//! Teeforge dispatcher API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! worker WebSocket infrastructure, background jobs) so integration tests
//! and the binary entrypoint can both access them.

pub mod artifacts;
pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
