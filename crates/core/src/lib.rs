//! Core domain types for the teeforge dispatcher.
//!
//! Pure state and lifecycle logic with no network I/O: the task model, the
//! task store with its pending queue, the worker protocol messages and the
//! shared error type. Used by both the api server and the worker client.

pub mod clock;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod store;
pub mod task;
pub mod types;
