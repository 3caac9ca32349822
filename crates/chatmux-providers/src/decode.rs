//! Body decoders for streamed HTTP responses (SSE and NDJSON)

use anyhow::{Context, Result, bail};
use futures::{Stream, StreamExt};

/// Maximum bytes buffered without seeing a newline
const MAX_LINE: usize = 16 * 1024 * 1024;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Splits a byte stream into lines. Splitting on `\n` never cuts a UTF-8
/// sequence, so chunk boundaries inside multi-byte characters are safe.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_LINE && !self.buf.contains(&b'\n') {
            bail!("response line exceeded {} bytes", MAX_LINE);
        }
        Ok(())
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left after the body ends without a trailing newline
    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

#[derive(Debug, Default)]
struct EventBuilder {
    event: Option<String>,
    data: Vec<String>,
}

impl EventBuilder {
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

/// Decode a `text/event-stream` body into events
pub fn sse_events<S, B, E>(body: S) -> impl Stream<Item = Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();
        let mut builder = EventBuilder::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("Stream read error")?;
            lines.push(chunk.as_ref())?;
            while let Some(line) = lines.next_line() {
                if let Some(event) = builder.feed(&line) {
                    yield event;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(event) = builder.feed(&line) {
                yield event;
            }
        }
        if let Some(event) = builder.dispatch() {
            yield event;
        }
    }
}

/// Decode a newline-delimited JSON body into non-empty lines
pub fn ndjson_lines<S, B, E>(body: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("Stream read error")?;
            lines.push(chunk.as_ref())?;
            while let Some(line) = lines.next_line() {
                if !line.trim().is_empty() {
                    yield line;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if !line.trim().is_empty() {
                yield line;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Body stream built from raw byte slices
    pub(crate) fn body(
        parts: &[&[u8]],
    ) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + Send + 'static {
        let parts: Vec<_> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        futures::stream::iter(parts)
    }

    #[tokio::test]
    async fn test_sse_basic_events() {
        let events: Vec<_> = sse_events(body(&[b"data: one\n\ndata: two\n\n"]))
            .collect()
            .await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_sse_event_names_comments_and_crlf() {
        let events: Vec<_> = sse_events(body(&[
            b": keep-alive\r\n\r\nevent: message_stop\r\ndata: {}\r\n\r\n",
        ]))
        .collect()
        .await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.event.as_deref(), Some("message_stop"));
        assert_eq!(event.data, "{}");
    }

    #[tokio::test]
    async fn test_sse_split_across_chunks() {
        // "é" is 0xC3 0xA9, split between two chunks
        let events: Vec<_> = sse_events(body(&[b"data: caf\xC3", b"\xA9\n", b"\n"]))
            .collect()
            .await;
        assert_eq!(events[0].as_ref().unwrap().data, "café");
    }

    #[tokio::test]
    async fn test_sse_multiline_data_and_trailing_event() {
        let events: Vec<_> = sse_events(body(&[b"data: a\ndata: b\n\ndata: tail"]))
            .collect()
            .await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["a\nb", "tail"]);
    }

    #[tokio::test]
    async fn test_sse_read_error_propagates() {
        let parts: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: ok\n\n".to_vec()),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ];
        let events: Vec<_> = sse_events(futures::stream::iter(parts)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn test_ndjson_lines() {
        let lines: Vec<_> = ndjson_lines(body(&[b"{\"a\":1}\n\n{\"b\"", b":2}\n{\"c\":3}"]))
            .collect()
            .await;
        let lines: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]);
    }
}
