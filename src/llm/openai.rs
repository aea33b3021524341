//! OpenAI-compatible chat completions adapter

use super::{LlmClient, LlmResponse, Message, Role, TokenUsage, ToolCall, ToolDefinition};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

/// Client for any `/v1/chat/completions` endpoint
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Convert history to the wire shape.
    ///
    /// A tool message whose call id was never emitted by an earlier assistant
    /// message is sent as user text; providers reject orphaned tool results.
    fn convert_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        let mut known_ids: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::Assistant if !msg.tool_calls.is_empty() => {
                    for tc in &msg.tool_calls {
                        known_ids.insert(tc.id.as_str());
                    }
                    out.push(serde_json::json!({
                        "role": "assistant",
                        "content": msg.content,
                        "tool_calls": msg.tool_calls.iter().map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments,
                                }
                            })
                        }).collect::<Vec<_>>(),
                    }));
                }
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().unwrap_or("");
                    if known_ids.contains(id) {
                        out.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": id,
                            "content": msg.text(),
                        }));
                    } else {
                        out.push(serde_json::json!({
                            "role": "user",
                            "content": format!("[tool result {}]\n{}", id, msg.text()),
                        }));
                    }
                }
                role => out.push(serde_json::json!({
                    "role": role.to_string(),
                    "content": msg.text(),
                })),
            }
        }

        out
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools.iter().map(ToolDefinition::to_function_schema).collect()
    }
}

fn normalize_base_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .trim_end_matches("/v1")
        .trim_end_matches('/')
        .to_string()
}

fn parse_response(body: &str) -> Result<LlmResponse> {
    let response: OpenAiResponse =
        serde_json::from_str(body).context("Failed to parse OpenAI response")?;
    let choice = response.choices.into_iter().next().context("No choices")?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
        .collect::<Vec<_>>();

    let content = choice.message.content.filter(|c| !c.is_empty());
    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        message: Message::assistant_tool_calls(content, tool_calls),
        usage,
        stop_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let mut request = serde_json::json!({
            "model": self.model,
            "messages": self.convert_messages(messages),
        });
        if !tools.is_empty() {
            request["tools"] = serde_json::json!(self.convert_tools(tools));
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        tracing::debug!(url = %url, model = %self.model, messages = messages.len(), "Sending chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;
        if !status.is_success() {
            anyhow::bail!("OpenAI API error at {} ({}): {}", url, status, body);
        }

        let parsed = parse_response(&body)?;
        tracing::info!(
            model = %self.model,
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            tool_calls = parsed.tool_calls().len(),
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
            "Chat completion finished"
        );
        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}
