//! Google Gemini provider

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

pub struct GoogleProvider {
    id: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl GoogleProvider {
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

    fn to_gemini_contents(messages: &[ChatMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let system_parts: Vec<GeminiPart> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| GeminiPart {
                text: Some(m.content.clone()),
            })
            .collect();

        let contents = messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                    ChatRole::System => return None,
                };
                Some(GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![GeminiPart {
                        text: Some(m.content.clone()),
                    }],
                })
            })
            .collect();

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        };
        (system, contents)
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let (system, contents) = Self::to_gemini_contents(messages);
        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": self.max_tokens },
        });
        if let Some(system) = system {
            body["systemInstruction"] = serde_json::to_value(system).unwrap_or(Value::Null);
        }
        body
    }
}

#[async_trait]
impl ChatProvider for GoogleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<RawStream> {
        let url = join_url(
            &self.base_url,
            &format!("/v1beta/models/{}:streamGenerateContent?alt=sse", self.model),
        );
        debug!(
            "Gemini request: provider={}, model={}, messages={}",
            self.id,
            self.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await
            .context("Failed to send request to Gemini API")?;
        let response = check_status(response, "Gemini").await?;

        Ok(Box::pin(decode(sse_events(response.bytes_stream()))))
    }
}

pub(crate) fn decode(
    events: impl Stream<Item = Result<SseEvent>> + Send + 'static,
) -> impl Stream<Item = Result<Box<dyn StreamChunk>>> + Send + 'static {
    events.map(|event| event.and_then(|e| parse_event(&e)))
}

fn parse_event(event: &SseEvent) -> Result<Box<dyn StreamChunk>> {
    let chunk: GeminiChunk = serde_json::from_str(&event.data)
        .with_context(|| format!("Failed to parse Gemini stream chunk: {}", event.data))?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("Gemini stream error: {}", error.message));
    }
    Ok(boxed_chunk(chunk))
}

impl StreamChunk for GeminiChunk {
    fn text(&self) -> Option<Cow<'_, str>> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        Some(Cow::Owned(text))
    }

    fn is_terminal(&self) -> bool {
        self.candidates
            .first()
            .is_some_and(|c| c.finish_reason.is_some())
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::body;
    use chatmux_core::{GatewayError, normalize};

    async fn tokens(payload: &'static [u8]) -> Vec<std::result::Result<String, GatewayError>> {
        let raw: RawStream = Box::pin(decode(sse_events(body(&[payload]))));
        normalize("gemini", raw)
            .map(|item| item.map(|t| t.text))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_decodes_parts_until_finish_reason() {
        let payload = b"data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hi \"},{\"text\":\"there\"}]}}]}\r\n\r\n\
data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"!\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n";
        let items = tokens(payload).await;
        let texts: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hi there", "!"]);
    }

    #[tokio::test]
    async fn test_error_chunk() {
        let payload = b"data: {\"error\":{\"code\":429,\"message\":\"Resource exhausted\"}}\n\n";
        let items = tokens(payload).await;
        assert!(matches!(
            &items[0],
            Err(GatewayError::StreamInterrupted { reason, .. }) if reason.contains("Resource exhausted")
        ));
    }

    #[test]
    fn test_roles_and_system_instruction() {
        let provider = GoogleProvider::new(
            "gemini".to_string(),
            "key".to_string(),
            "gemini-2.0-flash".to_string(),
            "https://generativelanguage.googleapis.com".to_string(),
            2048,
            Duration::from_secs(5),
        )
        .unwrap();
        let body = provider.request_body(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }
}
