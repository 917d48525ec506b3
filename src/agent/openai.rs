//! OpenAI-compatible chat-completions reasoner
//!
//! Works against any server speaking `POST {base}/chat/completions`,
//! hosted or local.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ChatMessage, DEFAULT_MAX_TOOL_ROUNDS, Reasoner, ReasonerContext, ReasonerOutput, Role, ToolCall};
use crate::error::{Result, ToolmuxError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReasonerConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; unset means no auth header
    pub api_key_env: String,
    pub max_tool_rounds: usize,
    pub timeout_ms: u64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            timeout_ms: 120_000,
        }
    }
}

impl ReasonerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct OpenAiReasoner {
    client: Client,
    api_key: Option<String>,
    config: ReasonerConfig,
}

impl OpenAiReasoner {
    /// Reads the key from `config.api_key_env`
    pub fn new(config: ReasonerConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            log::warn!("{} not set; sending requests without authorization", config.api_key_env);
        }
        Self::with_api_key(api_key, config)
    }

    pub fn with_api_key(api_key: Option<String>, config: ReasonerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ToolmuxError::Reasoner(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, prompt: &str, context: &ReasonerContext) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &context.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(context.history.iter().map(encode_message));
        messages.push(json!({"role": "user", "content": prompt}));
        messages.extend(context.turn.iter().map(encode_message));

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if !context.tools.is_empty() {
            let tools: Vec<Value> = context.tools.iter().map(|t| t.to_function_schema()).collect();
            body["tools"] = json!(tools);
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<ReasonerOutput> {
        let message = &body["choices"][0]["message"];
        if message.is_null() {
            return Err(ToolmuxError::Reasoner("response has no choices".to_string()));
        }

        if let Some(calls) = message["tool_calls"].as_array()
            && !calls.is_empty()
        {
            return calls.iter().map(decode_call).collect::<Result<Vec<_>>>().map(ReasonerOutput::ToolCalls);
        }

        Ok(ReasonerOutput::Text(message["content"].as_str().unwrap_or_default().to_string()))
    }

    async fn send_request(&self, body: Value) -> Result<Value> {
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolmuxError::Reasoner(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ToolmuxError::Reasoner(format!(
                "Rate limited, retry after {} seconds",
                retry_after
            )));
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ToolmuxError::Reasoner(format!("API error {}: {}", status, error_body)));
        }

        response
            .json()
            .await
            .map_err(|e| ToolmuxError::Reasoner(format!("Failed to parse response: {}", e)))
    }
}

fn encode_message(message: &ChatMessage) -> Value {
    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments.to_string()},
                    })
                })
                .collect();
            json!({"role": "assistant", "content": null, "tool_calls": calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        role => json!({"role": role, "content": message.content}),
    }
}

/// Arguments arrive as a JSON-encoded string
fn decode_call(call: &Value) -> Result<ToolCall> {
    let function = &call["function"];
    let name = function["name"]
        .as_str()
        .ok_or_else(|| ToolmuxError::Reasoner("tool call without a function name".to_string()))?;

    let arguments = match &function["arguments"] {
        Value::String(raw) if raw.trim().is_empty() => json!({}),
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| ToolmuxError::Reasoner(format!("tool call {} has malformed arguments: {}", name, e)))?,
        Value::Null => json!({}),
        other => other.clone(),
    };

    Ok(ToolCall::new(call["id"].as_str().unwrap_or_default(), name, arguments))
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn run(&self, prompt: &str, context: &ReasonerContext) -> Result<ReasonerOutput> {
        let body = self.build_request(prompt, context);
        log::debug!("chat/completions request with {} messages", body["messages"].as_array().map_or(0, |m| m.len()));
        let response = self.send_request(body).await?;
        self.parse_response(&response)
    }
}

impl std::fmt::Debug for OpenAiReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiReasoner")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
