//! `Chat`: one multi-turn LLM completion step (§6), the primitive the
//! incident investigation agent drives in a loop.
//!
//! Messages carry roles `{system, user, assistant, tool}`; the model may
//! request tool calls, which the caller (the investigation agent loop in
//! `hostctl-incidents`) executes via [`crate::execute::Execute`] and
//! feeds back as `tool` messages on the next turn. Terminal tools are
//! `resolve_incident`/`escalate_incident` — [`Chat`] itself is agnostic
//! to which tool names are terminal, that policy lives with the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Activity, ActivityError, Heartbeat};

/// A chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System prompt / instructions.
    System,
    /// End-user or automated-caller turn.
    User,
    /// Model turn.
    Assistant,
    /// Tool execution result fed back to the model.
    Tool,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: Role,
    /// Text content. Empty when `role == Assistant` and the turn is a
    /// pure tool call with no accompanying text.
    pub content: String,
    /// When `role == Tool`, the id of the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool the model may call, in JSON-Schema function-calling shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name, matching what [`crate::execute::Execute`] dispatches on.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

/// A tool invocation the model requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id echoed back in the matching `tool` message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments as raw JSON.
    pub arguments: Value,
}

/// Typed input for [`Chat`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    /// Full conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tools available this turn.
    pub tools: Vec<ToolSpec>,
}

/// One model turn: the assistant's reply text (if any) and any tool
/// calls it requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutput {
    /// Assistant text, possibly empty if the turn is tool-calls-only.
    pub content: String,
    /// Requested tool calls, empty if the model produced a final answer.
    pub tool_calls: Vec<ToolCall>,
}

/// The LLM provider surface [`Chat`] drives. A 429 or other transient
/// failure should surface as `Err` (mapped retryable by the activity);
/// the provider implementation is responsible for request sanitization
/// and response validation before returning.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion turn over `messages` with `tools` available.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> anyhow::Result<ChatOutput>;
}

/// Runs one LLM turn. Network/5xx/429 failures are retryable; a
/// response that fails provider-side validation (unsafe output) is
/// non-retryable since retrying the same prompt won't change it.
pub struct Chat {
    provider: Arc<dyn LlmProvider>,
}

impl Chat {
    /// Build the activity.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Activity for Chat {
    type Input = ChatInput;
    type Output = ChatOutput;

    fn name(&self) -> &'static str {
        "Chat"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        heartbeat: &mut Heartbeat,
    ) -> Result<Self::Output, ActivityError> {
        heartbeat.tick(None, Some("awaiting provider completion")).await;
        let output = self.provider.complete(&input.messages, &input.tools).await.map_err(ActivityError::Retryable)?;
        heartbeat.tick(None, Some("provider completion received")).await;
        Ok(output)
    }
}

/// Tool names the investigation agent loop treats as ending the
/// conversation (§6).
pub const TERMINAL_TOOLS: &[&str] = &["resolve_incident", "escalate_incident"];

/// Whether `tool_call` names a terminal tool.
pub fn is_terminal_tool(name: &str) -> bool {
    TERMINAL_TOOLS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(ChatOutput);

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> anyhow::Result<ChatOutput> {
            Ok(ChatOutput { content: self.0.content.clone(), tool_calls: self.0.tool_calls.clone() })
        }
    }

    #[tokio::test]
    async fn chat_returns_the_providers_tool_calls() {
        let call = ToolCall { id: "c1".into(), name: "list_nodes".into(), arguments: serde_json::json!({}) };
        let provider = Scripted(ChatOutput { content: String::new(), tool_calls: vec![call] });
        let activity = Chat::new(Arc::new(provider));
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));

        let output = activity
            .run(
                ChatInput {
                    messages: vec![ChatMessage { role: Role::User, content: "investigate".into(), tool_call_id: None }],
                    tools: vec![],
                },
                "key-1",
                &mut hb,
            )
            .await
            .unwrap();

        assert_eq!(output.tool_calls[0].name, "list_nodes");
    }

    #[test]
    fn resolve_and_escalate_are_terminal() {
        assert!(is_terminal_tool("resolve_incident"));
        assert!(is_terminal_tool("escalate_incident"));
        assert!(!is_terminal_tool("list_nodes"));
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_value(Role::Tool).unwrap(), "tool");
    }
}
