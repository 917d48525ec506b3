//! Toolmux - one tool catalog over many tool servers
//!
//! A [`Router`](router::Router) registers backends (spawned processes, TCP or
//! HTTP endpoints, or in-process data sources), merges the tools they advertise
//! into a single catalog and dispatches each call to the backend that owns the
//! tool. A failing backend only loses its own tools.

pub mod agent;
pub mod backend;
pub mod error;
pub mod fetch;
pub mod ipc;
pub mod router;
pub mod sources;
pub mod tools;

pub use error::{Result, ToolmuxError};
