//! Failover controller: select, attempt, stream, and retry before first output
//!
//! A request moves through `SELECTING → ATTEMPTING → STREAMING` and ends in
//! one of three terminal states:
//!
//! - **completed**: the provider reached its terminal marker; its health is reset
//! - **interrupted**: the provider broke after at least one token reached the
//!   caller; the caller gets the consistent prefix plus
//!   [`GatewayError::StreamInterrupted`] and nothing is retried
//! - **exhausted**: every provider failed before producing a token;
//!   [`GatewayError::AllProvidersExhausted`] carries each cause
//!
//! Failures before the first token send the request back to selection with a
//! different provider. Each provider is tried at most once per request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, error::Elapsed};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, ProviderFailure};
use crate::health::CooldownPolicy;
use crate::normalizer::normalize;
use crate::registry::ProviderRegistry;
use crate::selector::Selector;
use crate::stream::TokenStream;
use crate::types::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverConfig {
    pub cooldown: CooldownPolicy,
    /// Limit from invoking a provider to its first token. Expiry fails over.
    pub first_token_timeout: Option<Duration>,
    /// Limit between tokens once streaming. Expiry interrupts the stream.
    pub idle_timeout: Option<Duration>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            cooldown: CooldownPolicy::default(),
            first_token_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Drives one request across providers. Cheap to clone; clones share the
/// same selector and health state.
#[derive(Debug, Clone)]
pub struct FailoverController {
    selector: Arc<Selector>,
    config: FailoverConfig,
}

impl FailoverController {
    pub fn new(registry: Arc<ProviderRegistry>, config: FailoverConfig) -> Self {
        Self {
            selector: Arc::new(Selector::new(registry)),
            config,
        }
    }

    pub fn selector(&self) -> &Arc<Selector> {
        &self.selector
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        self.selector.registry()
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Stream a response for `messages`, failing over before first output.
    ///
    /// Nothing happens until the returned stream is polled.
    pub fn chat(&self, messages: Vec<ChatMessage>) -> TokenStream {
        let selector = Arc::clone(&self.selector);
        let config = self.config.clone();

        TokenStream::new(async_stream::stream! {
            let registry = Arc::clone(selector.registry());
            let max_attempts = registry.len();
            let mut tried: Vec<usize> = Vec::with_capacity(max_attempts);
            let mut failures: Vec<ProviderFailure> = Vec::new();

            'attempts: while tried.len() < max_attempts {
                let selection = match selector.next_excluding(&tried) {
                    Ok(selection) => selection,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                tried.push(selection.index);
                let provider_id = selection.id().to_string();
                debug!(
                    "Trying provider {} (attempt {}/{})",
                    provider_id,
                    tried.len(),
                    max_attempts
                );

                let deadline = config.first_token_timeout.map(|t| Instant::now() + t);

                let mut tokens = match within(deadline, selection.provider.stream(&messages)).await {
                    Ok(Ok(raw)) => normalize(provider_id.clone(), raw),
                    Ok(Err(e)) => {
                        let reason = format!("{:#}", e);
                        warn!("Provider {} failed before first token: {}", provider_id, reason);
                        registry.report_failure(selection.index, &config.cooldown);
                        failures.push(ProviderFailure { provider: provider_id, reason });
                        continue 'attempts;
                    }
                    Err(_) => {
                        let reason = timeout_reason(config.first_token_timeout);
                        warn!("Provider {} failed before first token: {}", provider_id, reason);
                        registry.report_failure(selection.index, &config.cooldown);
                        failures.push(ProviderFailure { provider: provider_id, reason });
                        continue 'attempts;
                    }
                };

                let mut delivered: u64 = 0;
                loop {
                    let limit = if delivered == 0 {
                        deadline
                    } else {
                        config.idle_timeout.map(|t| Instant::now() + t)
                    };

                    match within(limit, tokens.next()).await {
                        Ok(Some(Ok(token))) => {
                            delivered += 1;
                            yield Ok(token);
                        }
                        Ok(None) => {
                            registry.report_success(selection.index);
                            if !failures.is_empty() {
                                info!(
                                    "Request succeeded on failover provider {} after {} failures",
                                    provider_id,
                                    failures.len()
                                );
                            }
                            return;
                        }
                        Ok(Some(Err(e))) => {
                            registry.report_failure(selection.index, &config.cooldown);
                            if delivered == 0 {
                                let reason = failure_reason(&e);
                                warn!("Provider {} failed before first token: {}", provider_id, reason);
                                failures.push(ProviderFailure { provider: provider_id, reason });
                                continue 'attempts;
                            }
                            warn!(
                                "Provider {} interrupted after {} tokens: {}",
                                provider_id,
                                delivered,
                                failure_reason(&e)
                            );
                            yield Err(e);
                            return;
                        }
                        Err(_) => {
                            registry.report_failure(selection.index, &config.cooldown);
                            if delivered == 0 {
                                let reason = timeout_reason(config.first_token_timeout);
                                warn!("Provider {} failed before first token: {}", provider_id, reason);
                                failures.push(ProviderFailure { provider: provider_id, reason });
                                continue 'attempts;
                            }
                            warn!("Provider {} stalled after {} tokens", provider_id, delivered);
                            yield Err(GatewayError::StreamInterrupted {
                                provider: provider_id,
                                delivered,
                                reason: timeout_reason(config.idle_timeout),
                            });
                            return;
                        }
                    }
                }
            }

            warn!("All {} providers failed before producing output", failures.len());
            yield Err(GatewayError::AllProvidersExhausted { failures });
        })
    }
}

async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output, Elapsed> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await,
        None => Ok(fut.await),
    }
}

fn timeout_reason(limit: Option<Duration>) -> String {
    match limit {
        Some(limit) => format!("timed out after {:?}", limit),
        None => "timed out".to_string(),
    }
}

/// The bare cause of a failure, without the provider and count prefix
fn failure_reason(err: &GatewayError) -> String {
    match err {
        GatewayError::StreamInterrupted { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
