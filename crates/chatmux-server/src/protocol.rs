//! HTTP wire types: chat requests, stream events, error bodies

use axum::http::StatusCode;
use chatmux_core::{ChatMessage, GatewayError, ProviderFailure, Token};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /v1/chat` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// Error payload returned before any output was streamed
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProviderFailure>,
}

impl ErrorBody {
    pub fn from_error(err: &GatewayError) -> Self {
        let failures = match err {
            GatewayError::AllProvidersExhausted { failures } => failures.clone(),
            _ => Vec::new(),
        };
        Self {
            error: ErrorDetail {
                kind: err.kind().to_string(),
                message: err.to_string(),
                failures,
            },
        }
    }
}

/// Status code for an error surfaced before streaming started
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::AllProvidersExhausted { .. }
        | GatewayError::NoProvidersRegistered
        | GatewayError::NoCandidate { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// One server-sent event on a chat stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(Token),
    Error { kind: String, message: String },
    Done { tokens: u64 },
}

impl StreamEvent {
    pub fn error(err: &GatewayError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    /// SSE `event:` name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// SSE `data:` payload
    pub fn payload(&self) -> Value {
        match self {
            Self::Token(token) => serde_json::json!({ "seq": token.seq, "text": token.text }),
            Self::Error { kind, message } => serde_json::json!({ "kind": kind, "message": message }),
            Self::Done { tokens } => serde_json::json!({ "tokens": tokens }),
        }
    }
}
