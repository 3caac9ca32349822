//! Streaming provider adapters for chatmux
//!
//! Supports Anthropic, OpenAI, Google Gemini, Ollama, and any OpenAI-compatible
//! endpoint. Each adapter implements [`chatmux_core::ChatProvider`] and
//! decodes its vendor's stream format into chunks the core normalizes.

pub mod anthropic;
pub mod decode;
pub mod factory;
pub mod google;
mod http;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use factory::{ProviderKind, ProviderSpec, build_provider, build_registry, mask_secret};
pub use google::GoogleProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
