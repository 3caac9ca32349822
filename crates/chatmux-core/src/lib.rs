//! chatmux-core - Provider selection, failover and stream normalization
//!
//! This crate provides:
//! - The provider capability contract ([`ChatProvider`], [`StreamChunk`])
//! - A registry of providers with per-provider health state
//! - A round-robin [`Selector`] that skips providers in cooldown
//! - A [`FailoverController`] that retries other providers until the first
//!   token reaches the caller, and never after
//! - The [`ChatGateway`] facade consumed by the HTTP layer

pub mod error;
pub mod failover;
pub mod gateway;
pub mod health;
pub mod normalizer;
pub mod provider;
pub mod registry;
pub mod selector;
pub mod stream;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{GatewayError, ProviderFailure};
pub use failover::{FailoverConfig, FailoverController};
pub use gateway::ChatGateway;
pub use health::{CooldownPolicy, ProviderState, ProviderStatus};
pub use normalizer::normalize;
pub use provider::{ChatProvider, Fragment, RawStream, StreamChunk, boxed_chunk};
pub use registry::ProviderRegistry;
pub use selector::{Selection, Selector};
pub use stream::TokenStream;
pub use types::{ChatMessage, ChatRole, Token};
