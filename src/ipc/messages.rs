//! Wire message types shared by every hop (agent → router → backend).
//!
//! JSON Lines (newline-delimited JSON) over TCP or child-process stdio; the
//! same objects form the HTTP body for http backends. Field names follow the
//! familiar (id, method, params, result, error) shape but this is NOT a
//! JSON-RPC 2.0 implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolmuxError;
use crate::tools::ToolSpec;

/// Method names understood by tool servers and routers alike.
pub struct Methods;

impl Methods {
    /// Catalog discovery.
    pub const TOOLS_LIST: &'static str = "tools.list";
    /// Tool invocation.
    pub const TOOLS_CALL: &'static str = "tools.call";
    /// Liveness probe.
    pub const HEALTH: &'static str = "health";
}

/// Request sent to a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Unique request ID for correlating responses.
    pub id: u64,
    /// Method name (e.g., "tools.list", "tools.call").
    pub method: String,
    /// Method parameters as JSON value.
    #[serde(default)]
    pub params: Value,
}

impl WireRequest {
    /// Create a new request with the given method and params.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters.
    pub fn no_params(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }

    /// `tools.call` request.
    pub fn call(id: u64, name: &str, arguments: Value) -> Self {
        Self::new(
            id,
            Methods::TOOLS_CALL,
            serde_json::json!({ "name": name, "arguments": arguments }),
        )
    }
}

/// Response sent back by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    /// Request ID this response corresponds to.
    pub id: u64,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error details on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl WireResponse {
    /// Create a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: u64, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response indicates success.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Split into the result value or the error.
    pub fn into_result(self) -> Result<Value, WireError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error details in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Error code.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireError {
    /// Create a new error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error with additional data.
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    /// Method not found error (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::METHOD_NOT_FOUND,
            format!("Unknown method: {}", method.into()),
        )
    }

    /// Invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    /// Internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }

    /// Offending argument names, if the error carries them.
    pub fn fields(&self) -> Vec<String> {
        self.data
            .as_ref()
            .and_then(|d| d.get("fields"))
            .and_then(|f| f.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }
}

impl From<&ToolmuxError> for WireError {
    fn from(err: &ToolmuxError) -> Self {
        match err {
            ToolmuxError::UnknownTool(_) => Self::new(ErrorCode::UNKNOWN_TOOL, err.to_string()),
            ToolmuxError::InvalidArguments { fields, .. } => Self::with_data(
                ErrorCode::INVALID_PARAMS,
                err.to_string(),
                serde_json::json!({ "fields": fields }),
            ),
            ToolmuxError::BackendUnavailable { backend, .. } => Self::with_data(
                ErrorCode::BACKEND_UNAVAILABLE,
                err.to_string(),
                serde_json::json!({ "backend": backend }),
            ),
            ToolmuxError::ToolExecution { message, .. } => {
                Self::new(ErrorCode::TOOL_EXECUTION, message.clone())
            }
            ToolmuxError::Fetch(_) => Self::new(ErrorCode::TOOL_EXECUTION, err.to_string()),
            ToolmuxError::Protocol(_) | ToolmuxError::Json(_) => {
                Self::new(ErrorCode::INVALID_PARAMS, err.to_string())
            }
            _ => Self::internal_error(err.to_string()),
        }
    }
}

/// Standard error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters (tool arguments included).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal server error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Tool name not in catalog.
    pub const UNKNOWN_TOOL: i32 = 2001;
    /// Owning backend is down.
    pub const BACKEND_UNAVAILABLE: i32 = 2002;
    /// Tool ran and failed.
    pub const TOOL_EXECUTION: i32 = 2003;
}

/// `tools.list` result body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolListResult {
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// `tools.call` params body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `health` result body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: HealthState,
    #[serde(default)]
    pub tools: usize,
    /// Fingerprint of the advertised tool list, when the server computes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}
