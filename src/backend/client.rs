//! Typed protocol client for one backend, with lazy (re)connection

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Result, ToolmuxError};
use crate::ipc::client::RpcChannel;
use crate::ipc::messages::{
    ErrorCode, HealthResult, HealthState, Methods, ToolListResult, WireError, WireRequest,
};
use crate::tools::ToolSpec;

use super::Connector;

/// Speaks `tools.list` / `tools.call` / `health` to one backend.
///
/// The channel is opened on first use and reopened after it closes, so a
/// restarted backend is picked up by the next request.
pub struct BackendClient {
    backend: String,
    connector: Arc<dyn Connector>,
    channel: Mutex<Option<Arc<dyn RpcChannel>>>,
    next_id: AtomicU64,
}

impl BackendClient {
    pub fn new(backend: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            backend: backend.into(),
            connector,
            channel: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Whether a usable channel is currently held
    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.as_ref().is_some_and(|c| c.is_open())
    }

    async fn channel(&self) -> Result<Arc<dyn RpcChannel>> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref()
            && channel.is_open()
        {
            return Ok(Arc::clone(channel));
        }
        if let Some(stale) = guard.take() {
            let _ = stale.close().await;
        }

        log::debug!("Backend {}: connecting via {}", self.backend, self.connector.describe());
        let channel = self.connector.connect().await?;
        *guard = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Send one request. Transport failures drop the cached channel.
    async fn request(&self, method: &str, params: Value) -> Result<std::result::Result<Value, WireError>> {
        let channel = self.channel().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match channel.send(WireRequest::new(id, method, params)).await {
            Ok(response) => Ok(response.into_result()),
            Err(e) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Discover the backend's tools
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let result = self
            .request(Methods::TOOLS_LIST, Value::Object(Default::default()))
            .await?
            .map_err(|e| {
                ToolmuxError::Protocol(format!("{}: tools.list failed: {}", self.backend, e.message))
            })?;
        let body: ToolListResult = serde_json::from_value(result).map_err(|e| {
            ToolmuxError::Protocol(format!("{}: malformed tools.list result: {}", self.backend, e))
        })?;
        Ok(body.tools)
    }

    /// Invoke `name` (the backend-local name) and return its payload.
    ///
    /// Remote errors come back as `InvalidArguments`, `UnknownTool`,
    /// `BackendUnavailable` or `ToolExecution`; anything else is a transport
    /// or protocol failure.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        match self.request(Methods::TOOLS_CALL, params).await? {
            Ok(result) => Ok(extract_payload(result)),
            Err(error) => Err(self.remote_error(name, error)),
        }
    }

    /// Liveness probe; a backend reporting itself unreachable counts as a failure
    pub async fn health(&self) -> Result<HealthResult> {
        let result = self
            .request(Methods::HEALTH, Value::Object(Default::default()))
            .await?
            .map_err(|e| ToolmuxError::Protocol(format!("{}: health failed: {}", self.backend, e.message)))?;
        let health: HealthResult = serde_json::from_value(result)
            .map_err(|e| ToolmuxError::Protocol(format!("{}: malformed health result: {}", self.backend, e)))?;
        if health.status == HealthState::Unreachable {
            return Err(ToolmuxError::BackendUnavailable {
                backend: self.backend.clone(),
                reason: "reports itself unreachable".to_string(),
            });
        }
        Ok(health)
    }

    /// Close the current channel (kills a spawned process)
    pub async fn disconnect(&self) {
        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel
            && let Err(e) = channel.close().await
        {
            log::warn!("Backend {}: error closing channel: {}", self.backend, e);
        }
    }

    fn remote_error(&self, tool: &str, error: WireError) -> ToolmuxError {
        match error.code {
            ErrorCode::INVALID_PARAMS => ToolmuxError::InvalidArguments {
                tool: tool.to_string(),
                fields: error.fields(),
            },
            ErrorCode::UNKNOWN_TOOL => ToolmuxError::UnknownTool(tool.to_string()),
            ErrorCode::BACKEND_UNAVAILABLE => ToolmuxError::BackendUnavailable {
                backend: error
                    .data
                    .as_ref()
                    .and_then(|d| d.get("backend"))
                    .and_then(|b| b.as_str())
                    .unwrap_or(&self.backend)
                    .to_string(),
                reason: error.message,
            },
            _ => ToolmuxError::ToolExecution {
                tool: tool.to_string(),
                message: error.message,
            },
        }
    }
}

/// `{success, payload}` envelopes are unwrapped; anything else is the payload itself
fn extract_payload(result: Value) -> Value {
    match result {
        Value::Object(mut map) if map.contains_key("payload") => map.remove("payload").unwrap_or(Value::Null),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalConnector;
    use crate::tools::ToolBox;
    use crate::tools::provider::testing::{EchoTool, FailingTool};

    fn client() -> (BackendClient, Arc<EchoTool>) {
        let echo = Arc::new(EchoTool::new("echo"));
        let toolbox = ToolBox::new("local").with_tool(echo.clone()).with_tool(Arc::new(FailingTool));
        let client = BackendClient::new("local", Arc::new(LocalConnector::new(Arc::new(toolbox))));
        (client, echo)
    }

    #[tokio::test]
    async fn test_list_tools() {
        let (client, _) = client();
        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "always_fails"]);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_call_tool_unwraps_payload() {
        let (client, echo) = client();
        let payload = client.call_tool("echo", serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(payload, serde_json::json!({"echo": "hi"}));
        assert_eq!(echo.calls(), 1);
    }

    #[tokio::test]
    async fn test_call_tool_maps_remote_errors() {
        let (client, _) = client();

        let err = client.call_tool("echo", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolmuxError::InvalidArguments { ref fields, .. } if fields == &vec!["text".to_string()]));

        let err = client.call_tool("always_fails", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolmuxError::ToolExecution { .. }));

        let err = client.call_tool("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolmuxError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_health() {
        let (client, _) = client();
        let health = client.health().await.unwrap();
        assert_eq!(health.status, HealthState::Healthy);
        assert_eq!(health.tools, 2);
    }

    #[tokio::test]
    async fn test_reconnects_after_disconnect() {
        let (client, _) = client();
        client.health().await.unwrap();
        client.disconnect().await;
        assert!(!client.is_connected().await);
        client.health().await.unwrap();
        assert!(client.is_connected().await);
    }

    #[test]
    fn test_extract_payload() {
        assert_eq!(
            extract_payload(serde_json::json!({"success": true, "payload": [1]})),
            serde_json::json!([1])
        );
        assert_eq!(extract_payload(serde_json::json!("bare")), serde_json::json!("bare"));
    }
}
