//! IPC Layer - the JSON-lines wire protocol shared by routers and tool servers
//!
//! This module provides:
//! - Message types for requests, responses and errors
//! - A tool server loop over TCP or stdio
//! - A client channel that correlates responses by id

pub mod client;
pub mod messages;
pub mod server;

pub use client::{LineChannel, RpcChannel};
pub use messages::{
    CallParams, ErrorCode, HealthResult, HealthState, Methods, ToolListResult, WireError, WireRequest,
    WireResponse,
};
pub use server::{RequestHandler, ToolServer, ToolServerConfig, serve_connection, serve_stdio};
