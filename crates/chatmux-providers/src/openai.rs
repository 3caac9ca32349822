//! OpenAI provider (GPT-4o, o3, etc.) and OpenAI-compatible endpoints

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chatmux_core::{ChatMessage, ChatProvider, RawStream, StreamChunk, boxed_chunk};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::decode::{SseEvent, sse_events};
use crate::http::{check_status, join_url, streaming_client};

pub struct OpenAiProvider {
    id: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
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

    fn to_openai_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "messages": Self::to_openai_messages(messages),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<RawStream> {
        let url = join_url(&self.base_url, "/v1/chat/completions");
        debug!(
            "OpenAI request: provider={}, model={}, messages={}",
            self.id,
            self.model,
            messages.len()
        );

        let mut request = self.client.post(&url).json(&self.request_body(messages));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;
        let response = check_status(response, "OpenAI").await?;

        Ok(Box::pin(decode(sse_events(response.bytes_stream()))))
    }
}

pub(crate) fn decode(
    events: impl Stream<Item = Result<SseEvent>> + Send + 'static,
) -> impl Stream<Item = Result<Box<dyn StreamChunk>>> + Send + 'static {
    events.map(|event| event.and_then(|e| parse_event(&e)))
}

fn parse_event(event: &SseEvent) -> Result<Box<dyn StreamChunk>> {
    if event.data.trim() == "[DONE]" {
        return Ok(boxed_chunk(OpenAiEvent::Done));
    }
    let chunk: OpenAiChunk = serde_json::from_str(&event.data)
        .with_context(|| format!("Failed to parse OpenAI stream chunk: {}", event.data))?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("OpenAI stream error: {}", error.message));
    }
    Ok(boxed_chunk(OpenAiEvent::Chunk(chunk)))
}

/// A decoded `data:` payload
#[derive(Debug)]
pub(crate) enum OpenAiEvent {
    Chunk(OpenAiChunk),
    Done,
}

impl StreamChunk for OpenAiEvent {
    fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Chunk(chunk) => chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .map(Cow::Borrowed),
            Self::Done => None,
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            Self::Chunk(chunk) => chunk
                .choices
                .first()
                .is_some_and(|c| c.finish_reason.is_some()),
            Self::Done => true,
        }
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::body;
    use chatmux_core::{GatewayError, normalize};

    async fn tokens(payload: &'static [u8]) -> Vec<std::result::Result<String, GatewayError>> {
        let raw: RawStream = Box::pin(decode(sse_events(body(&[payload]))));
        normalize("openai", raw)
            .map(|item| item.map(|t| t.text))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_decodes_deltas_until_done() {
        let payload = b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";
        let items = tokens(payload).await;
        let texts: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_done_sentinel_alone_terminates() {
        let payload = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        let items = tokens(payload).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_interrupted() {
        let payload = b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
        let items = tokens(payload).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[1],
            Err(GatewayError::StreamInterrupted { delivered: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_error_payload_is_stream_error() {
        let payload = b"data: {\"error\":{\"message\":\"Rate limit reached\"}}\n\n";
        let items = tokens(payload).await;
        match &items[0] {
            Err(GatewayError::StreamInterrupted { reason, delivered, .. }) => {
                assert_eq!(*delivered, 0);
                assert!(reason.contains("Rate limit reached"));
            }
            other => panic!("expected stream error, got {:?}", other),
        }
    }

    #[test]
    fn test_request_body() {
        let provider = OpenAiProvider::new(
            "main".to_string(),
            "sk-test".to_string(),
            "gpt-4o".to_string(),
            "https://api.openai.com".to_string(),
            1024,
            Duration::from_secs(5),
        )
        .unwrap();
        let body = provider.request_body(&[ChatMessage::system("be brief"), ChatMessage::user("hi")]);
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_debug_hides_key() {
        let provider = OpenAiProvider::new(
            "main".to_string(),
            "sk-secret".to_string(),
            "gpt-4o".to_string(),
            "https://api.openai.com".to_string(),
            1024,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!format!("{:?}", provider).contains("sk-secret"));
    }
}
