//! Hosting tools in-process: the backend tool server side of the protocol
//!
//! A [`ToolBox`] holds a set of [`LocalTool`]s and answers `tools.list`,
//! `tools.call` and `health` for them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, ToolmuxError};
use crate::ipc::messages::{
    CallParams, HealthResult, HealthState, Methods, ToolListResult, WireError, WireRequest, WireResponse,
};
use crate::ipc::server::RequestHandler;

use super::catalog::fingerprint_specs;
use super::definition::ToolSpec;
use super::schema::{validate_arguments, violating_fields};

/// A tool implemented in this process
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Name, description and input schema
    fn spec(&self) -> ToolSpec;

    /// Execute with already-validated arguments
    async fn call(&self, arguments: Value) -> Result<Value>;
}

/// A named set of local tools served over the wire protocol
#[derive(Clone, Default)]
pub struct ToolBox {
    name: String,
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn LocalTool>>,
}

impl ToolBox {
    /// Create an empty tool box
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: Vec::new(),
            tools: HashMap::new(),
        }
    }

    /// Add a tool; a tool with the same name is replaced in place
    pub fn with_tool(mut self, tool: Arc<dyn LocalTool>) -> Self {
        self.add(tool);
        self
    }

    /// Add a tool to the box
    pub fn add(&mut self, tool: Arc<dyn LocalTool>) {
        let name = tool.spec().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Tool box name (used in logs)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Specs in insertion order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.spec())
            .collect()
    }

    /// Get number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the box is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate then run one tool
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolmuxError::UnknownTool(name.to_string()))?;

        let violations = validate_arguments(&tool.spec().input_schema, &arguments);
        if !violations.is_empty() {
            return Err(ToolmuxError::InvalidArguments {
                tool: name.to_string(),
                fields: violating_fields(&violations),
            });
        }

        log::info!("{}: calling {}", self.name, name);
        tool.call(arguments).await.map_err(|e| match e {
            ToolmuxError::InvalidArguments { .. } | ToolmuxError::ToolExecution { .. } => e,
            other => ToolmuxError::ToolExecution {
                tool: name.to_string(),
                message: other.to_string(),
            },
        })
    }
}

impl RequestHandler for ToolBox {
    fn handle(
        &self,
        request: WireRequest,
    ) -> impl std::future::Future<Output = WireResponse> + Send {
        async move {
            let id = request.id;
            match request.method.as_str() {
                Methods::TOOLS_LIST => {
                    let body = ToolListResult {
                        tools: self.specs(),
                        fingerprint: None,
                    };
                    match serde_json::to_value(body) {
                        Ok(v) => WireResponse::success(id, v),
                        Err(e) => WireResponse::error(id, WireError::internal_error(e.to_string())),
                    }
                }
                Methods::TOOLS_CALL => {
                    let params: CallParams = match serde_json::from_value(request.params) {
                        Ok(p) => p,
                        Err(e) => {
                            return WireResponse::error(id, WireError::invalid_params(format!("Bad call params: {}", e)));
                        }
                    };
                    match self.call(&params.name, params.arguments).await {
                        Ok(payload) => {
                            WireResponse::success(id, serde_json::json!({ "success": true, "payload": payload }))
                        }
                        Err(e) => {
                            log::warn!("{}: {} failed: {}", self.name, params.name, e);
                            WireResponse::error(id, WireError::from(&e))
                        }
                    }
                }
                Methods::HEALTH => {
                    let body = HealthResult {
                        status: HealthState::Healthy,
                        tools: self.len(),
                        fingerprint: Some(fingerprint_specs(&self.specs())),
                    };
                    WireResponse::success(id, serde_json::to_value(body).unwrap_or(Value::Null))
                }
                other => WireResponse::error(id, WireError::method_not_found(other)),
            }
        }
    }
}
