//! Gateway error taxonomy

use serde::Serialize;
use thiserror::Error;

/// A single failed provider attempt, kept for exhaustion reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed conversation; no provider was contacted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("no providers registered")]
    NoProvidersRegistered,

    /// Every registered provider was excluded from a selection
    #[error("no provider left to try ({excluded} excluded)")]
    NoCandidate { excluded: usize },

    /// A single attempt failed before producing output. Recovered by failover.
    #[error("provider '{provider}' failed: {reason}")]
    ProviderCall { provider: String, reason: String },

    /// The provider broke after `delivered` tokens reached the caller.
    #[error("stream from '{provider}' interrupted after {delivered} tokens: {reason}")]
    StreamInterrupted {
        provider: String,
        delivered: u64,
        reason: String,
    },

    #[error("all {} providers failed: {}", failures.len(), format_failures(failures))]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },
}

impl GatewayError {
    /// Stable machine-readable code for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::DuplicateProvider(_) => "duplicate_provider",
            Self::NoProvidersRegistered => "no_providers",
            Self::NoCandidate { .. } => "no_candidate",
            Self::ProviderCall { .. } => "provider_call",
            Self::StreamInterrupted { .. } => "stream_interrupted",
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
        }
    }
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
