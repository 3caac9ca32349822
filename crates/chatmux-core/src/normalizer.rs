//! Stream normalizer: provider chunks in, canonical tokens out

use std::borrow::Cow;

use futures::StreamExt;
use tracing::debug;

use crate::error::GatewayError;
use crate::provider::RawStream;
use crate::stream::TokenStream;
use crate::types::Token;

/// Convert a provider's raw chunk stream into sequence-numbered tokens.
///
/// Sequence numbers start at 0 and have no gaps. Chunks without text are
/// skipped. Reading stops at the first terminal chunk. If the raw stream
/// errors or closes without a terminal chunk, every token produced so far is
/// yielded and then a [`GatewayError::StreamInterrupted`] ends the stream.
pub fn normalize(provider: impl Into<String>, raw: RawStream) -> TokenStream {
    let provider = provider.into();

    TokenStream::new(async_stream::stream! {
        let mut raw = raw;
        let mut seq: u64 = 0;

        loop {
            match raw.next().await {
                Some(Ok(chunk)) => {
                    let terminal = chunk.is_terminal();
                    let text = chunk.text().map(Cow::into_owned);
                    if let Some(text) = text.filter(|t| !t.is_empty()) {
                        yield Ok(Token { seq, text });
                        seq += 1;
                    }
                    if terminal {
                        debug!("Provider {} finished after {} tokens", provider, seq);
                        return;
                    }
                }
                Some(Err(e)) => {
                    yield Err(GatewayError::StreamInterrupted {
                        provider: provider.clone(),
                        delivered: seq,
                        reason: format!("{:#}", e),
                    });
                    return;
                }
                None => {
                    yield Err(GatewayError::StreamInterrupted {
                        provider: provider.clone(),
                        delivered: seq,
                        reason: "stream closed without a terminal marker".to_string(),
                    });
                    return;
                }
            }
        }
    })
}
