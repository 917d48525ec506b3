//! HTTP transport: each request is POSTed as a JSON body, the response body is the reply

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Result, ToolmuxError};
use crate::ipc::client::RpcChannel;
use crate::ipc::messages::{WireRequest, WireResponse};

use super::Connector;

/// Stateless; "connecting" just hands out a channel bound to the URL
pub struct HttpConnector {
    url: String,
    client: Client,
}

impl HttpConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolmuxError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn RpcChannel>> {
        Ok(Arc::new(HttpChannel {
            url: self.url.clone(),
            client: self.client.clone(),
        }))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct HttpChannel {
    url: String,
    client: Client,
}

#[async_trait]
impl RpcChannel for HttpChannel {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolmuxError::Transport(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolmuxError::Transport(format!(
                "POST {} returned HTTP {}: {}",
                self.url,
                status.as_u16(),
                body
            )));
        }

        let reply: WireResponse = response
            .json()
            .await
            .map_err(|e| ToolmuxError::Protocol(format!("{}: malformed response body: {}", self.url, e)))?;
        if reply.id != request.id {
            return Err(ToolmuxError::Protocol(format!(
                "{}: response id {} does not match request id {}",
                self.url, reply.id, request.id
            )));
        }
        Ok(reply)
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
