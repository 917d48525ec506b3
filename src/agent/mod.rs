//! Agent - drives a reasoner through prompt -> tool calls -> results rounds
//!
//! The reasoner (a chat model) is an opaque capability behind [`Reasoner`];
//! tools are reached through any [`ToolInvoker`], either an in-process
//! [`Router`](crate::router::Router) or a remote router over the wire.

mod openai;

pub use openai::{OpenAiReasoner, ReasonerConfig};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendClient;
use crate::error::{Result, ToolmuxError};
use crate::router::InvocationResult;
use crate::tools::ToolSpec;

/// Default bound on tool rounds per prompt
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Something that can list and invoke tools
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    async fn invoke(&self, name: &str, arguments: Value) -> InvocationResult;
}

/// A router reached over the wire
#[async_trait]
impl ToolInvoker for BackendClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        BackendClient::list_tools(self).await
    }

    async fn invoke(&self, name: &str, arguments: Value) -> InvocationResult {
        InvocationResult::from_result(name, self.call_tool(name, arguments).await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the reasoner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, "")
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Everything the reasoner sees besides the current prompt
#[derive(Debug, Clone, Default)]
pub struct ReasonerContext {
    pub system: Option<String>,
    /// Completed earlier turns
    pub history: Vec<ChatMessage>,
    /// Tool calls and results from the current turn, in order
    pub turn: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// What the reasoner wants next
#[derive(Debug, Clone, PartialEq)]
pub enum ReasonerOutput {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// The model behind the agent
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn run(&self, prompt: &str, context: &ReasonerContext) -> Result<ReasonerOutput>;
}

/// A conversation: keeps history across prompts until wiped
pub struct AgentSession {
    reasoner: Arc<dyn Reasoner>,
    invoker: Arc<dyn ToolInvoker>,
    system: Option<String>,
    history: Vec<ChatMessage>,
    max_tool_rounds: usize,
}

impl AgentSession {
    pub fn new(reasoner: Arc<dyn Reasoner>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            reasoner,
            invoker,
            system: None,
            history: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Forget every earlier turn
    pub fn wipe(&mut self) {
        log::info!("Wiping {} messages of conversation history", self.history.len());
        self.history.clear();
    }

    /// Run one prompt to a final answer. History is only updated on success.
    pub async fn ask(&mut self, prompt: &str) -> Result<String> {
        let mut context = ReasonerContext {
            system: self.system.clone(),
            history: self.history.clone(),
            turn: Vec::new(),
            tools: self.invoker.list_tools().await?,
        };

        for round in 0..=self.max_tool_rounds {
            let calls = match self.reasoner.run(prompt, &context).await? {
                ReasonerOutput::Text(answer) => {
                    self.history.push(ChatMessage::user(prompt));
                    self.history.append(&mut context.turn);
                    self.history.push(ChatMessage::assistant(answer.clone()));
                    return Ok(answer);
                }
                ReasonerOutput::ToolCalls(calls) => calls,
            };

            if round == self.max_tool_rounds {
                break;
            }
            log::info!("Round {}: reasoner requested {} tool calls", round + 1, calls.len());

            let results = join_all(calls.iter().map(|call| self.invoker.invoke(&call.name, call.arguments.clone()))).await;

            context.turn.push(ChatMessage::assistant_calls(calls.clone()));
            for (call, result) in calls.iter().zip(results) {
                if let Some(error) = &result.error {
                    log::warn!("Tool {} failed ({:?}): {}", call.name, error.kind, error.message);
                }
                context.turn.push(ChatMessage::tool_result(call.id.clone(), serde_json::to_string(&result)?));
            }
        }

        Err(ToolmuxError::Reasoner(format!(
            "no final answer after {} tool rounds",
            self.max_tool_rounds
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalConnector;
    use crate::router::FailureKind;
    use crate::tools::ToolBox;
    use crate::tools::provider::testing::EchoTool;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back outputs and records each context it saw
    struct ScriptedReasoner {
        outputs: Mutex<VecDeque<ReasonerOutput>>,
        seen: Mutex<Vec<ReasonerContext>>,
    }

    impl ScriptedReasoner {
        fn new(outputs: Vec<ReasonerOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn run(&self, _prompt: &str, context: &ReasonerContext) -> Result<ReasonerOutput> {
            self.seen.lock().unwrap().push(context.clone());
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ToolmuxError::Reasoner("script exhausted".into()))
        }
    }

    fn invoker() -> (Arc<BackendClient>, Arc<EchoTool>) {
        let echo = Arc::new(EchoTool::new("echo"));
        let toolbox = ToolBox::new("tools").with_tool(echo.clone());
        let client = BackendClient::new("router", Arc::new(LocalConnector::new(Arc::new(toolbox))));
        (Arc::new(client), echo)
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let (invoker, _) = invoker();
        let reasoner = Arc::new(ScriptedReasoner::new(vec![ReasonerOutput::Text("hello".into())]));
        let mut session = AgentSession::new(reasoner.clone(), invoker);

        assert_eq!(session.ask("hi").await.unwrap(), "hello");
        assert_eq!(session.history().len(), 2);
        assert_eq!(reasoner.seen.lock().unwrap()[0].tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let (invoker, echo) = invoker();
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            ReasonerOutput::ToolCalls(vec![ToolCall::new("c1", "echo", serde_json::json!({"text": "x"}))]),
            ReasonerOutput::Text("done".into()),
        ]));
        let mut session = AgentSession::new(reasoner.clone(), invoker);

        assert_eq!(session.ask("use a tool").await.unwrap(), "done");
        assert_eq!(echo.calls(), 1);

        let seen = reasoner.seen.lock().unwrap();
        let turn = &seen[1].turn;
        assert_eq!(turn.len(), 2);
        assert_eq!(turn[0].tool_calls[0].name, "echo");
        assert_eq!(turn[1].tool_call_id.as_deref(), Some("c1"));
        let result: InvocationResult = serde_json::from_str(&turn[1].content).unwrap();
        assert!(result.success);

        // user, assistant tool calls, tool result, final answer
        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_to_reasoner() {
        let (invoker, _) = invoker();
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            ReasonerOutput::ToolCalls(vec![ToolCall::new("c1", "echo", serde_json::json!({}))]),
            ReasonerOutput::Text("sorry".into()),
        ]));
        let mut session = AgentSession::new(reasoner.clone(), invoker);
        session.ask("q").await.unwrap();

        let seen = reasoner.seen.lock().unwrap();
        let result: InvocationResult = serde_json::from_str(&seen[1].turn[1].content).unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let (invoker, echo) = invoker();
        let call = || ReasonerOutput::ToolCalls(vec![ToolCall::new("c", "echo", serde_json::json!({"text": "x"}))]);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![call(), call(), call()]));
        let mut session = AgentSession::new(reasoner, invoker).with_max_tool_rounds(2);

        let err = session.ask("loop forever").await.unwrap_err();
        assert!(matches!(err, ToolmuxError::Reasoner(_)));
        assert_eq!(echo.calls(), 2);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_carries_over_and_wipe_clears() {
        let (invoker, _) = invoker();
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            ReasonerOutput::Text("one".into()),
            ReasonerOutput::Text("two".into()),
            ReasonerOutput::Text("three".into()),
        ]));
        let mut session = AgentSession::new(reasoner.clone(), invoker).with_system_prompt("be brief");

        session.ask("first").await.unwrap();
        session.ask("second").await.unwrap();
        assert_eq!(reasoner.seen.lock().unwrap()[1].history.len(), 2);

        session.wipe();
        session.ask("third").await.unwrap();
        let seen = reasoner.seen.lock().unwrap();
        assert!(seen[2].history.is_empty());
        assert_eq!(seen[2].system.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool_result("id-1", "{}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("id-1"));

        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }
}
