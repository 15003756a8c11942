//! Anthropic and OpenAI providers implementing
//! [`hostctl_activities::llm::LlmProvider`] directly against each
//! vendor's HTTP API, including tool-calling.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hostctl_activities::llm::{ChatMessage, ChatOutput, LlmProvider, Role, ToolCall, ToolSpec};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};
use url::Url;

/// Anthropic Claude provider with secure API key handling.
pub struct AnthropicProvider {
    client: Client,
    api_key: Secret<String>,
    model: String,
    base_url: Url,
    max_tokens: u32,
}

/// OpenAI GPT provider with secure API key handling.
pub struct OpenAiProvider {
    client: Client,
    api_key: Secret<String>,
    model: String,
    organization: Option<String>,
    base_url: Url,
    max_tokens: u32,
}

// Anthropic wire types (Messages API, tool-use variant).

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[allow(dead_code)]
    input_tokens: u32,
    #[allow(dead_code)]
    output_tokens: u32,
}

// OpenAI wire types (Chat Completions API, tool-calling variant).

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallFunction {
    name: String,
    arguments: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with secure configuration.
    pub async fn new(api_key: Secret<String>, model: String, base_url: Option<String>, timeout_seconds: u64) -> Result<Self> {
        if !api_key.expose_secret().starts_with("sk-ant-") {
            anyhow::bail!("Invalid Anthropic API key format");
        }

        let base_url = base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let base_url = Url::parse(&base_url).context("Invalid Anthropic base URL")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent("hostctl-llm-gateway/0.1")
            .build()
            .context("Failed to create HTTP client")?;

        let max_tokens = match model.as_str() {
            "claude-3-5-sonnet-20241022" => 8192,
            "claude-3-haiku-20240307" | "claude-3-opus-20240229" => 4096,
            _ => 4096,
        };

        debug!("Initialized Anthropic provider with model: {}", model);
        Ok(Self { client, api_key, model, base_url, max_tokens })
    }

    fn create_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(self.api_key.expose_secret()).context("invalid API key header value")?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        Ok(headers)
    }

    fn to_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = None;
        let mut out = Vec::new();

        for message in messages {
            match message.role {
                Role::System => {
                    system = Some(match system.take() {
                        Some(existing) => format!("{existing}\n{}", message.content),
                        None => message.content.clone(),
                    });
                }
                Role::User => out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![AnthropicContentBlock::Text { text: message.content.clone() }],
                }),
                Role::Assistant => out.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: vec![AnthropicContentBlock::Text { text: message.content.clone() }],
                }),
                Role::Tool => out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![AnthropicContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.content.clone(),
                    }],
                }),
            }
        }

        (system, out)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    #[instrument(skip(self, messages, tools), fields(model = %self.model))]
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatOutput> {
        let (system, anthropic_messages) = Self::to_anthropic_messages(messages);

        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages: anthropic_messages,
            tools: tools
                .iter()
                .map(|t| AnthropicTool { name: t.name.clone(), description: t.description.clone(), input_schema: t.parameters.clone() })
                .collect(),
        };

        let headers = self.create_headers().context("Failed to create request headers")?;
        let url = self.base_url.join("/v1/messages").context("Failed to construct API URL")?;

        let response = self.client.post(url).headers(headers).json(&request).send().await.context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!("Anthropic API error {}: {}", status, error_text);
            anyhow::bail!("Anthropic API error {}: {}", status, error_text);
        }

        let parsed: AnthropicResponse = response.json().await.context("Failed to parse Anthropic API response")?;
        let _ = parsed.usage;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicResponseBlock::Text { text } => content.push_str(&text),
                AnthropicResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall { id, name, arguments: input }),
            }
        }

        Ok(ChatOutput { content, tool_calls })
    }
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with secure configuration.
    pub async fn new(api_key: Secret<String>, model: String, organization: Option<String>, base_url: Option<String>, timeout_seconds: u64) -> Result<Self> {
        if !api_key.expose_secret().starts_with("sk-") {
            anyhow::bail!("Invalid OpenAI API key format");
        }

        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com".to_string());
        let base_url = Url::parse(&base_url).context("Invalid OpenAI base URL")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent("hostctl-llm-gateway/0.1")
            .build()
            .context("Failed to create HTTP client")?;

        let max_tokens = match model.as_str() {
            "gpt-4" => 8192,
            "gpt-4-turbo" | "gpt-3.5-turbo" => 4096,
            _ => 4096,
        };

        debug!("Initialized OpenAI provider with model: {}", model);
        Ok(Self { client, api_key, model, organization, base_url, max_tokens })
    }

    fn create_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.api_key.expose_secret());
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth_value).context("Invalid authorization header value")?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization", HeaderValue::from_str(org).context("Invalid organization header value")?);
        }
        Ok(headers)
    }

    fn to_openai_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string(),
                content: Some(m.content.clone()),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    #[instrument(skip(self, messages, tools), fields(model = %self.model))]
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatOutput> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: Self::to_openai_messages(messages),
            tools: tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function",
                    function: OpenAiToolFunction { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() },
                })
                .collect(),
        };

        let headers = self.create_headers().context("Failed to create request headers")?;
        let url = self.base_url.join("/v1/chat/completions").context("Failed to construct API URL")?;

        let response = self.client.post(url).headers(headers).json(&request).send().await.context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!("OpenAI API error {}: {}", status, error_text);
            anyhow::bail!("OpenAI API error {}: {}", status, error_text);
        }

        let parsed: OpenAiResponse = response.json().await.context("Failed to parse OpenAI API response")?;
        let choice = parsed.choices.into_iter().next().context("OpenAI response had no choices")?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
                ToolCall { id: call.id, name: call.function.name, arguments }
            })
            .collect();

        Ok(ChatOutput { content: choice.message.content.unwrap_or_default(), tool_calls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_maps_system_messages_into_the_top_level_system_field() {
        let messages = vec![
            ChatMessage { role: Role::System, content: "be terse".to_string(), tool_call_id: None },
            ChatMessage { role: Role::User, content: "hi".to_string(), tool_call_id: None },
        ];
        let (system, out) = AnthropicProvider::to_anthropic_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn anthropic_maps_tool_messages_to_tool_result_blocks() {
        let messages = vec![ChatMessage { role: Role::Tool, content: "{}".to_string(), tool_call_id: Some("call_1".to_string()) }];
        let (_, out) = AnthropicProvider::to_anthropic_messages(&messages);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0].content[0], AnthropicContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"));
    }

    #[test]
    fn openai_carries_tool_call_id_through_on_tool_messages() {
        let messages = vec![ChatMessage { role: Role::Tool, content: "{}".to_string(), tool_call_id: Some("call_2".to_string()) }];
        let out = OpenAiProvider::to_openai_messages(&messages);
        assert_eq!(out[0].role, "tool");
        assert_eq!(out[0].tool_call_id.as_deref(), Some("call_2"));
    }
}
