//! Single-shot HTTP GET behind a trait so retry logic can be exercised offline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

/// A raw HTTP response: status code plus body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP status layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Request or read timed out
    Timeout(String),
    /// Could not establish a connection
    Connect(String),
    /// Anything else (malformed URL, body decode, ...)
    Other(String),
}

impl SendError {
    /// Timeouts and connection failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Timeout(_) | SendError::Connect(_))
    }

    /// Short class name used in attempt logs
    pub fn class(&self) -> &'static str {
        match self {
            SendError::Timeout(_) => "timeout",
            SendError::Connect(_) => "connect",
            SendError::Other(_) => "other",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SendError::Timeout(m) | SendError::Connect(m) | SendError::Other(m) => m,
        }
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class(), self.message())
    }
}

/// Issues one GET request
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse, SendError>;
}

/// reqwest-backed sender
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    /// Create a sender whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, SendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout(err.to_string())
    } else if err.is_connect() {
        SendError::Connect(err.to_string())
    } else {
        SendError::Other(err.to_string())
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<RawResponse, SendError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(RawResponse { status, body })
    }
}
