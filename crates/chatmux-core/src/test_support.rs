//! Scripted in-memory providers shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;

use crate::provider::{ChatProvider, Fragment, RawStream, boxed_chunk};
use crate::types::ChatMessage;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Text(String),
    Fail(String),
    Done,
}

pub(crate) fn text(s: &str) -> Step {
    Step::Text(s.to_string())
}

/// Sets its flag when the stream holding it is dropped
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedProvider {
    id: String,
    steps: Vec<Step>,
    reject_first: usize,
    hang_after_steps: bool,
    calls: AtomicUsize,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    /// Streams `steps` on every call
    pub(crate) fn streaming(id: &str, steps: Vec<Step>) -> Self {
        Self {
            id: id.to_string(),
            steps,
            reject_first: 0,
            hang_after_steps: false,
            calls: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Streams `words` followed by a terminal marker
    pub(crate) fn ok(id: &str, words: &[&str]) -> Self {
        let mut steps: Vec<Step> = words.iter().map(|w| text(w)).collect();
        steps.push(Step::Done);
        Self::streaming(id, steps)
    }

    /// Rejects every call before producing a stream
    pub(crate) fn rejecting(id: &str) -> Self {
        let mut provider = Self::streaming(id, Vec::new());
        provider.reject_first = usize::MAX;
        provider
    }

    /// Rejects the first `n` calls, then behaves like `ok`
    pub(crate) fn flaky(id: &str, n: usize, words: &[&str]) -> Self {
        let mut provider = Self::ok(id, words);
        provider.reject_first = n;
        provider
    }

    /// Never yields anything after `steps`
    pub(crate) fn hanging(id: &str, steps: Vec<Step>) -> Self {
        let mut provider = Self::streaming(id, steps);
        provider.hang_after_steps = true;
        provider
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<RawStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.reject_first {
            return Err(anyhow!("status 503: {} unavailable", self.id));
        }

        let items: Vec<Result<_>> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Text(t) => Ok(boxed_chunk(Fragment::Text(t.clone()))),
                Step::Done => Ok(boxed_chunk(Fragment::Done)),
                Step::Fail(reason) => Err(anyhow!("{}", reason)),
            })
            .collect();

        let tail: RawStream = if self.hang_after_steps {
            Box::pin(futures::stream::pending())
        } else {
            Box::pin(futures::stream::empty())
        };

        let guard = ReleaseGuard(Arc::clone(&self.released));
        let stream = futures::stream::iter(items).chain(tail).map(move |item| {
            let _held = &guard;
            item
        });
        Ok(Box::pin(stream))
    }
}

pub(crate) fn conversation() -> Vec<ChatMessage> {
    vec![ChatMessage::user("hello")]
}
