//! HTTP server: Axum router, chat streaming and status endpoints

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatmux_core::{ChatGateway, ChatMessage, GatewayError, Token, TokenStream};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::auth;
use crate::protocol::{ChatRequest, ErrorBody, StreamEvent, status_for};

/// Shared state for all requests
#[derive(Clone)]
pub struct ServerState {
    pub gateway: ChatGateway,
    pub auth_token: String,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub struct GatewayServer {
    state: ServerState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, gateway: ChatGateway, auth_token: String) -> Self {
        let state = ServerState {
            gateway,
            auth_token,
            start_time: Instant::now(),
            started_at: Utc::now(),
        };
        Self { state, bind }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/chat", post(chat_handler))
            .route("/api/status", get(status_handler))
            .route("/healthz", get(|| async { "ok" }))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

// ── Handlers ──

async fn status_handler(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if !auth::check_headers(&state.auth_token, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({
        "status": "ok",
        "started_at": state.started_at.to_rfc3339(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "providers": state.gateway.statuses(),
    }))
    .into_response()
}

async fn chat_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    if !auth::check_headers(&state.auth_token, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let request_id = Uuid::new_v4();
    let span = info_span!("chat", %request_id);

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = GatewayError::InvalidRequest(rejection.body_text());
            return error_response(&err);
        }
    };

    match start_chat(&state.gateway, request.messages)
        .instrument(span)
        .await
    {
        Ok(events) => {
            let events = events.map(|event| Ok::<_, Infallible>(to_sse(&event)));
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &GatewayError) -> Response {
    (status_for(err), Json(ErrorBody::from_error(err))).into_response()
}

fn to_sse(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

/// Start a chat and wait for its first item.
///
/// Errors that happen before any token exists (validation, exhaustion) are
/// returned here so they can become a plain HTTP error. Once a token is in
/// hand the response is committed to streaming. The rest of the stream is
/// polled inside the span current at the call.
pub async fn start_chat(
    gateway: &ChatGateway,
    messages: Vec<ChatMessage>,
) -> Result<BoxStream<'static, StreamEvent>, GatewayError> {
    let mut tokens = gateway.chat(messages)?;
    let first = match tokens.next().await {
        Some(Ok(token)) => Some(token),
        Some(Err(err)) => {
            warn!("Chat failed before streaming: {}", err);
            return Err(err);
        }
        None => None,
    };
    debug!("First token ready, streaming response");
    Ok(event_stream(first, tokens, Span::current()).boxed())
}

fn event_stream(
    first: Option<Token>,
    tokens: TokenStream,
    span: Span,
) -> impl futures::Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let mut tokens = tokens;
        let mut count: u64 = 0;
        if let Some(token) = first {
            count += 1;
            yield StreamEvent::Token(token);
        }
        while let Some(item) = tokens.next().instrument(span.clone()).await {
            match item {
                Ok(token) => {
                    count += 1;
                    yield StreamEvent::Token(token);
                }
                Err(err) => {
                    span.in_scope(|| {
                        warn!("Chat stream interrupted after {} tokens ({})", count, err.kind())
                    });
                    yield StreamEvent::error(&err);
                    return;
                }
            }
        }
        span.in_scope(|| debug!("Chat stream completed with {} tokens", count));
        yield StreamEvent::Done { tokens: count };
    }
}
