//! Canonical token stream handed to callers

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::error::GatewayError;
use crate::types::Token;

/// A pull-based, cancellable stream of [`Token`]s.
///
/// Items arrive in `seq` order. At most one `Err` is yielded and it is always
/// the last item. Dropping the stream (or calling [`TokenStream::cancel`])
/// drops the provider stream it is reading from, which closes the upstream
/// connection; cancellation is never recorded as a provider failure.
pub struct TokenStream {
    inner: Pin<Box<dyn Stream<Item = Result<Token, GatewayError>> + Send>>,
}

impl TokenStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Token, GatewayError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Abandon the response and release the provider stream now
    pub fn cancel(self) {
        drop(self);
    }

    /// Drain the stream, concatenating token text
    pub async fn collect_text(mut self) -> Result<String, GatewayError> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(&item?.text);
        }
        Ok(text)
    }
}

impl Stream for TokenStream {
    type Item = Result<Token, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(seq: u64, text: &str) -> Token {
        Token {
            seq,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_collect_text() {
        let stream = TokenStream::new(futures::stream::iter(vec![
            Ok(token(0, "hello ")),
            Ok(token(1, "world")),
        ]));
        assert_eq!(stream.collect_text().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_collect_text_surfaces_error() {
        let stream = TokenStream::new(futures::stream::iter(vec![
            Ok(token(0, "partial")),
            Err(GatewayError::StreamInterrupted {
                provider: "p".to_string(),
                delivered: 1,
                reason: "reset".to_string(),
            }),
        ]));
        let err = stream.collect_text().await.unwrap_err();
        assert_eq!(err.kind(), "stream_interrupted");
    }
}
