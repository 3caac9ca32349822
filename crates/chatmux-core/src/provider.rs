//! Provider capability contract
//!
//! Adapters for concrete vendors live outside the core. Each one implements
//! [`ChatProvider`] and yields its own chunk type through [`StreamChunk`], so
//! adding a vendor never requires touching selection or failover.

use std::borrow::Cow;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::types::ChatMessage;

/// An incremental response object in whatever shape the provider emits
pub trait StreamChunk: Send + std::fmt::Debug {
    /// Text carried by this chunk, if any
    fn text(&self) -> Option<Cow<'_, str>>;

    /// Whether this chunk marks the natural end of the response
    fn is_terminal(&self) -> bool;
}

/// Lazy sequence of raw provider chunks. Dropping it must release the
/// underlying connection.
pub type RawStream = Pin<Box<dyn Stream<Item = Result<Box<dyn StreamChunk>>> + Send>>;

/// Trait that all inference backends implement
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Unique identifier used for registration and health tracking
    fn id(&self) -> &str;

    /// Start a streamed completion for `messages`.
    ///
    /// Errors returned here, or yielded before the first text chunk, are
    /// treated as pre-first-token failures.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<RawStream>;
}

/// Minimal chunk shape for adapters that already speak plain text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Done,
}

impl StreamChunk for Fragment {
    fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(text) => Some(Cow::Borrowed(text)),
            Self::Done => None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Box a chunk for a [`RawStream`]
pub fn boxed_chunk<C: StreamChunk + 'static>(chunk: C) -> Box<dyn StreamChunk> {
    Box::new(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_chunk() {
        let text = Fragment::Text("hi".to_string());
        assert_eq!(text.text().as_deref(), Some("hi"));
        assert!(!text.is_terminal());
        assert!(Fragment::Done.text().is_none());
        assert!(Fragment::Done.is_terminal());
    }
}
