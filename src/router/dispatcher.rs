//! Dispatcher - routes one invocation to the backend that owns the tool
//!
//! Order of checks: name in catalog, owner healthy, arguments valid, then
//! the forwarded call. The first three never touch the network.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Backend;
use crate::error::{Result, ToolmuxError};
use crate::tools::{ToolCatalog, validate_arguments, violating_fields};

/// A tool call as issued by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl InvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Failure classes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    BackendUnavailable,
    ToolExecution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Offending argument names (invalid_arguments only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

/// Typed outcome of an invocation; exactly one of `payload` / `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationFailure>,
}

impl InvocationResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failed(error: &ToolmuxError) -> Self {
        let (kind, fields, backend) = match error {
            ToolmuxError::UnknownTool(_) => (FailureKind::UnknownTool, Vec::new(), None),
            ToolmuxError::InvalidArguments { fields, .. } => (FailureKind::InvalidArguments, fields.clone(), None),
            ToolmuxError::BackendUnavailable { backend, .. } => {
                (FailureKind::BackendUnavailable, Vec::new(), Some(backend.clone()))
            }
            _ => (FailureKind::ToolExecution, Vec::new(), None),
        };
        let message = match error {
            ToolmuxError::ToolExecution { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            success: false,
            payload: None,
            error: Some(InvocationFailure {
                kind,
                message,
                fields,
                backend,
            }),
        }
    }

    pub fn from_result(tool: &str, result: Result<Value>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(e) => {
                log::debug!("Invocation of {} failed: {}", tool, e);
                Self::failed(&e)
            }
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Back to a `Result`, rebuilding the typed error
    pub fn into_result(self, tool: &str) -> Result<Value> {
        if self.success {
            return Ok(self.payload.unwrap_or(Value::Null));
        }
        let Some(failure) = self.error else {
            return Err(ToolmuxError::Protocol(format!("{}: failure without error details", tool)));
        };
        Err(match failure.kind {
            FailureKind::UnknownTool => ToolmuxError::UnknownTool(tool.to_string()),
            FailureKind::InvalidArguments => ToolmuxError::InvalidArguments {
                tool: tool.to_string(),
                fields: failure.fields,
            },
            FailureKind::BackendUnavailable => ToolmuxError::BackendUnavailable {
                backend: failure.backend.unwrap_or_default(),
                reason: failure.message,
            },
            FailureKind::ToolExecution => ToolmuxError::ToolExecution {
                tool: tool.to_string(),
                message: failure.message,
            },
        })
    }
}

/// Stateless apart from its timeout; all shared state is passed in per call
#[derive(Debug, Clone)]
pub struct Dispatcher {
    invoke_timeout: Duration,
}

impl Dispatcher {
    pub fn new(invoke_timeout: Duration) -> Self {
        Self { invoke_timeout }
    }

    pub async fn invoke(
        &self,
        catalog: &ToolCatalog,
        backends: &[Arc<Backend>],
        request: InvocationRequest,
    ) -> InvocationResult {
        let tool = request.tool_name.clone();
        InvocationResult::from_result(&tool, self.try_invoke(catalog, backends, request).await)
    }

    pub async fn try_invoke(
        &self,
        catalog: &ToolCatalog,
        backends: &[Arc<Backend>],
        request: InvocationRequest,
    ) -> Result<Value> {
        let name = request.tool_name.as_str();
        let descriptor = catalog
            .get(name)
            .ok_or_else(|| ToolmuxError::UnknownTool(name.to_string()))?;

        let backend = backends
            .iter()
            .find(|b| b.id() == descriptor.backend)
            .ok_or_else(|| ToolmuxError::BackendUnavailable {
                backend: descriptor.backend.clone(),
                reason: "backend is not registered".to_string(),
            })?;
        if !backend.handle().is_healthy() {
            return Err(ToolmuxError::BackendUnavailable {
                backend: descriptor.backend.clone(),
                reason: format!("backend is {}", backend.handle().status()),
            });
        }

        let violations = validate_arguments(&descriptor.input_schema, &request.arguments);
        if !violations.is_empty() {
            for v in &violations {
                log::debug!("{}: argument '{}' rejected: {}", name, v.field, v.reason);
            }
            return Err(ToolmuxError::InvalidArguments {
                tool: name.to_string(),
                fields: violating_fields(&violations),
            });
        }

        log::info!(
            "Dispatching {} to backend {} as {}",
            name,
            descriptor.backend,
            descriptor.remote_name
        );
        let call = backend.client().call_tool(&descriptor.remote_name, request.arguments);
        let outcome = match tokio::time::timeout(self.invoke_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolmuxError::Transport(format!(
                "no response within {:?}",
                self.invoke_timeout
            ))),
        };

        match outcome {
            Ok(payload) => Ok(payload),
            Err(e @ ToolmuxError::ToolExecution { .. }) | Err(e @ ToolmuxError::BackendUnavailable { .. }) => Err(e),
            Err(ToolmuxError::InvalidArguments { fields, .. }) => Err(ToolmuxError::InvalidArguments {
                tool: name.to_string(),
                fields,
            }),
            Err(ToolmuxError::UnknownTool(_)) => Err(ToolmuxError::ToolExecution {
                tool: name.to_string(),
                message: format!(
                    "backend {} no longer provides {}",
                    descriptor.backend, descriptor.remote_name
                ),
            }),
            Err(e) => {
                backend.handle().mark_unreachable(&e.to_string());
                Err(ToolmuxError::BackendUnavailable {
                    backend: descriptor.backend.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
