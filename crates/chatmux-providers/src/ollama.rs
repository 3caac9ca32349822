//! Ollama provider for local models (NDJSON streaming)

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

use crate::decode::ndjson_lines;
use crate::http::{check_status, join_url, streaming_client};

#[derive(Debug)]
pub struct OllamaProvider {
    id: String,
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OllamaProvider {
    pub fn new(
        id: String,
        model: String,
        base_url: String,
        max_tokens: u32,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            id,
            client: streaming_client(connect_timeout)?,
            base_url,
            model,
            max_tokens,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let messages: Vec<OllamaMessage> = messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": { "num_predict": self.max_tokens },
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<RawStream> {
        let url = join_url(&self.base_url, "/api/chat");
        debug!(
            "Ollama request: provider={}, model={}, messages={}",
            self.id,
            self.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(messages))
            .send()
            .await
            .context("Failed to send request to Ollama")?;
        let response = check_status(response, "Ollama").await?;

        Ok(Box::pin(decode(ndjson_lines(response.bytes_stream()))))
    }
}

pub(crate) fn decode(
    lines: impl Stream<Item = Result<String>> + Send + 'static,
) -> impl Stream<Item = Result<Box<dyn StreamChunk>>> + Send + 'static {
    lines.map(|line| line.and_then(|l| parse_line(&l)))
}

fn parse_line(line: &str) -> Result<Box<dyn StreamChunk>> {
    let chunk: OllamaChunk = serde_json::from_str(line)
        .with_context(|| format!("Failed to parse Ollama stream line: {}", line))?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("Ollama stream error: {}", error));
    }
    Ok(boxed_chunk(chunk))
}

impl StreamChunk for OllamaChunk {
    fn text(&self) -> Option<Cow<'_, str>> {
        self.message
            .as_ref()
            .map(|m| Cow::Borrowed(m.content.as_str()))
    }

    fn is_terminal(&self) -> bool {
        self.done
    }
}

// ── Ollama wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}
