//! Fetch-with-Retry - bounded, linearly backed-off HTTP GET for upstream data sources
//!
//! Transport failures (timeouts, refused connections) and retryable statuses
//! (408, 429, 5xx) are retried; any other non-2xx status is terminal. Exhausting
//! the attempt budget is a distinct error, never an empty success.

mod http;

pub use http::{HttpSend, RawResponse, ReqwestSender, SendError};

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default attempt budget: the first try plus five retries
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Default backoff unit; attempt `n` waits `n` units
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Errors surfaced by [`Fetcher`]
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Every attempt failed with a retryable error
    #[error("GET {url} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Upstream answered with a non-retryable HTTP status
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16, body: String },

    /// Request could not be issued at all
    #[error("GET {url} could not be sent: {message}")]
    Request { url: String, message: String },

    /// Body did not match the expected shape
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Delay after the failed attempt `attempt` (1-indexed)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * attempt
    }
}

/// Statuses that indicate a transient upstream condition
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
}

/// A GET request: URL plus query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Successful response plus the number of attempts it took
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub attempts: u32,
}

impl FetchResponse {
    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|e| FetchError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// Retrying HTTP client shared by the data-source adapters
#[derive(Clone)]
pub struct Fetcher {
    sender: Arc<dyn HttpSend>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(sender: Arc<dyn HttpSend>, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    /// reqwest sender with the given per-request timeout
    pub fn with_timeout(timeout: Duration, policy: RetryPolicy) -> Result<Self, FetchError> {
        let sender = ReqwestSender::new(timeout).map_err(|e| FetchError::Request {
            url: String::new(),
            message: e.to_string(),
        })?;
        Ok(Self::new(Arc::new(sender), policy))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Issue the request, retrying transient failures
    pub async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            log::debug!("HTTP GET attempt {} to {}", attempt, request.url);

            let class = match self.sender.get(&request.url, &request.query).await {
                Ok(raw) if raw.is_success() => {
                    if attempt > 1 {
                        log::info!("HTTP GET {} succeeded on attempt {}", request.url, attempt);
                    }
                    return Ok(FetchResponse {
                        url: request.url.clone(),
                        status: raw.status,
                        body: raw.body,
                        attempts: attempt,
                    });
                }
                Ok(raw) if is_retryable_status(raw.status) => {
                    last_error = format!("HTTP {}", raw.status);
                    "status"
                }
                Ok(raw) => {
                    log::error!(
                        "HTTP GET {} attempt {} returned non-retryable status {}",
                        request.url,
                        attempt,
                        raw.status
                    );
                    return Err(FetchError::Status {
                        url: request.url.clone(),
                        status: raw.status,
                        body: raw.body,
                    });
                }
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    e.class()
                }
                Err(e) => {
                    log::error!("Unexpected error in HTTP request to {}: {}", request.url, e);
                    return Err(FetchError::Request {
                        url: request.url.clone(),
                        message: e.to_string(),
                    });
                }
            };

            log::warn!(
                "HTTP GET attempt {}/{} to {} failed: {}: {}",
                attempt,
                max_attempts,
                request.url,
                class,
                last_error
            );

            if attempt < max_attempts {
                let delay = self.policy.backoff_for(attempt);
                log::info!("Waiting {:?} before retrying {}", delay, request.url);
                tokio::time::sleep(delay).await;
            }
        }

        Err(FetchError::Exhausted {
            url: request.url.clone(),
            attempts: max_attempts,
            last_error,
        })
    }
}
