//! Anthropic provider (Claude models) over the streaming Messages API

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chatmux_core::{ChatMessage, ChatProvider, ChatRole, RawStream, StreamChunk, boxed_chunk};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::decode::{SseEvent, sse_events};
use crate::http::{check_status, join_url, streaming_client};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(
        id: String,
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: u32,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            id,
            client: streaming_client(connect_timeout)?,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    /// Split system prompts out of the conversation; Anthropic takes them as
    /// a top-level field
    fn to_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();
        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, turns)
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let (system, turns) = Self::to_anthropic_messages(messages);
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "messages": turns,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        body
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<RawStream> {
        let url = join_url(&self.base_url, "/v1/messages");
        debug!(
            "Anthropic request: provider={}, model={}, messages={}",
            self.id,
            self.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(messages))
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;
        let response = check_status(response, "Anthropic").await?;

        Ok(Box::pin(decode(sse_events(response.bytes_stream()))))
    }
}

pub(crate) fn decode(
    events: impl Stream<Item = Result<SseEvent>> + Send + 'static,
) -> impl Stream<Item = Result<Box<dyn StreamChunk>>> + Send + 'static {
    events.map(|event| event.and_then(|e| parse_event(&e)))
}

fn parse_event(event: &SseEvent) -> Result<Box<dyn StreamChunk>> {
    let parsed: AnthropicEvent = serde_json::from_str(&event.data)
        .with_context(|| format!("Failed to parse Anthropic stream event: {}", event.data))?;
    if let AnthropicEvent::Error { error } = &parsed {
        return Err(anyhow!(
            "Anthropic stream error ({}): {}",
            error.error_type,
            error.message
        ));
    }
    Ok(boxed_chunk(parsed))
}

impl StreamChunk for AnthropicEvent {
    fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::ContentBlockDelta {
                delta: AnthropicDelta::TextDelta { text },
            } => Some(Cow::Borrowed(text)),
            _ => None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop)
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicEvent {
    ContentBlockDelta { delta: AnthropicDelta },
    MessageStop,
    Error { error: AnthropicError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
