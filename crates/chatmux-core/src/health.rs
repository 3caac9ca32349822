//! Per-provider health bookkeeping and cooldown backoff

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Exponential cooldown applied after each consecutive failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl CooldownPolicy {
    /// `base * 2^prior_failures`, capped
    pub fn cooldown_for(&self, prior_failures: u32) -> Duration {
        let factor = 2u32.checked_pow(prior_failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

/// Mutable health state for one registered provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderState {
    pub provider_id: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
    pub last_failure: Option<Instant>,
    /// How many times the selector has handed out this provider
    pub selections: u64,
}

impl ProviderState {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            healthy: true,
            consecutive_failures: 0,
            cooldown_until: None,
            last_failure: None,
            selections: 0,
        }
    }

    /// Healthy, or unhealthy with an expired cooldown
    pub fn is_available(&self, now: Instant) -> bool {
        self.healthy || self.cooldown_until.is_none_or(|until| now >= until)
    }

    pub fn record_failure(&mut self, now: Instant, policy: &CooldownPolicy) {
        let cooldown = policy.cooldown_for(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.healthy = false;
        self.cooldown_until = Some(now + cooldown);
        self.last_failure = Some(now);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.healthy = true;
        self.cooldown_until = None;
    }

    pub fn status(&self, now: Instant) -> ProviderStatus {
        let cooldown_remaining_ms = self
            .cooldown_until
            .map(|until| until.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0);
        ProviderStatus {
            id: self.provider_id.clone(),
            healthy: self.healthy,
            available: self.is_available(now),
            consecutive_failures: self.consecutive_failures,
            cooldown_remaining_ms,
            selections: self.selections,
        }
    }
}

/// Serializable snapshot of a provider's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub healthy: bool,
    pub available: bool,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: u64,
    pub selections: u64,
}
