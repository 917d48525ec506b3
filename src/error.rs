//! Error types for toolmux
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::fetch::FetchError;

/// All error types that can occur in toolmux
#[derive(Debug, Error)]
pub enum ToolmuxError {
    /// Network or process transport failed (connect, write, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Requested tool is not in the current catalog
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not satisfy the tool's input schema
    #[error("Invalid arguments for '{tool}': {}", fields.join(", "))]
    InvalidArguments { tool: String, fields: Vec<String> },

    /// Owning backend is not healthy or failed mid-call
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Backend ran the tool and reported a failure
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// One or more backends were skipped during a catalog refresh
    #[error("Catalog refresh skipped unreachable backends: {}", .0.join(", "))]
    CatalogRefreshPartialFailure(Vec<String>),

    /// A backend with this identifier is already registered
    #[error("Duplicate backend: {0}")]
    DuplicateBackend(String),

    /// No backend with this identifier
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Peer sent something that does not follow the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Upstream HTTP data source failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Reasoner (model endpoint) error
    #[error("Reasoner error: {0}")]
    Reasoner(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for toolmux operations
pub type Result<T> = std::result::Result<T, ToolmuxError>;
