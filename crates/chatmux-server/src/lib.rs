//! chatmux-server - HTTP streaming surface for the chat gateway
//!
//! Exposes `POST /v1/chat` as server-sent events, plus provider status and a
//! liveness probe. Errors raised before the first token become ordinary HTTP
//! errors; failures after it arrive as a terminal `error` event.

pub mod auth;
pub mod protocol;
pub mod server;

pub use server::{GatewayServer, start_chat};
