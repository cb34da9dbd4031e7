//! Completion transport for an OpenAI-compatible chat-completions endpoint.
//!
//! The transport is a trait so the engine's single-flight, retry, and
//! supersede behavior can be exercised against a scripted fake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::message::{Message, Role, ToolCall};
use crate::tools::ToolDef;

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What a completion attempt yielded. Transport-level failures (timeouts,
/// connection errors, non-2xx statuses) are `anyhow` errors instead; those
/// are the retryable kind.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// The assistant's message, possibly carrying tool calls.
    Assistant(Message),
    /// The endpoint answered successfully but with an application-level
    /// error payload (quota, moderation, etc.). Not retried.
    ApiError(String),
}

#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome>;
}

pub struct HttpCompletionApi {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpCompletionApi {
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            api_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionApi for HttpCompletionApi {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome> {
        let url = format!("{}/chat/completions", self.api_url);

        let mut req = self.client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await.context("Failed to send completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion API error {}: {}", status, body);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        parse_completion(&body)
    }
}

/// Extract the assistant message (or application-level error) from a
/// chat-completions response body.
pub fn parse_completion(body: &serde_json::Value) -> Result<CompletionOutcome> {
    if let Some(error) = body.get("error") {
        let text = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Ok(CompletionOutcome::ApiError(text));
    }

    let choice = body["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .context("Empty choices in completion response")?;
    let message = &choice["message"];

    let content = message["content"].as_str().map(String::from);
    let tool_calls: Option<Vec<ToolCall>> = message
        .get("tool_calls")
        .and_then(|tc| serde_json::from_value(tc.clone()).ok());

    Ok(CompletionOutcome::Assistant(Message {
        role: Role::Assistant,
        content,
        tool_calls,
        tool_call_id: None,
        follow_up: false,
    }))
}
