//! Provider registry
//!
//! Providers are registered once at startup and kept in insertion order,
//! which is also the rotation order. Registration needs `&mut self`; once the
//! registry is shared behind an `Arc` the provider set is frozen and only the
//! per-provider health state changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::health::{CooldownPolicy, ProviderState, ProviderStatus};
use crate::provider::ChatProvider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ChatProvider>>,
    index: HashMap<String, usize>,
    states: Mutex<Vec<ProviderState>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from providers in rotation order
    pub fn from_providers(
        providers: impl IntoIterator<Item = Arc<dyn ChatProvider>>,
    ) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for provider in providers {
            registry.register(provider)?;
        }
        Ok(registry)
    }

    /// Add a provider to the end of the rotation with a fresh healthy state
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) -> Result<(), GatewayError> {
        let id = provider.id().to_string();
        if self.index.contains_key(&id) {
            return Err(GatewayError::DuplicateProvider(id));
        }

        debug!("Registering provider {} at position {}", id, self.providers.len());
        self.index.insert(id.clone(), self.providers.len());
        self.states_mut().push(ProviderState::new(id));
        self.providers.push(provider);
        Ok(())
    }

    /// Providers in rotation order
    pub fn list(&self) -> &[Arc<dyn ChatProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub(crate) fn provider(&self, index: usize) -> &Arc<dyn ChatProvider> {
        &self.providers[index]
    }

    /// Snapshot of a provider's health state
    pub fn state_of(&self, id: &str) -> Option<ProviderState> {
        let idx = *self.index.get(id)?;
        self.lock_states().get(idx).cloned()
    }

    /// Health snapshot for every provider, in rotation order
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        let now = Instant::now();
        self.lock_states().iter().map(|s| s.status(now)).collect()
    }

    pub(crate) fn report_failure(&self, index: usize, policy: &CooldownPolicy) {
        let mut states = self.lock_states();
        if let Some(state) = states.get_mut(index) {
            state.record_failure(Instant::now(), policy);
            warn!(
                "Provider {} marked unhealthy ({} consecutive failures)",
                state.provider_id, state.consecutive_failures
            );
        }
    }

    pub(crate) fn report_success(&self, index: usize) {
        let mut states = self.lock_states();
        if let Some(state) = states.get_mut(index) {
            if !state.healthy {
                info!("Provider {} recovered", state.provider_id);
            }
            state.record_success();
        }
    }

    /// The single serialization point for health state. Never held across
    /// an await.
    pub(crate) fn lock_states(&self) -> MutexGuard<'_, Vec<ProviderState>> {
        // Health data is advisory, so a poisoned lock is still usable
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn states_mut(&mut self) -> &mut Vec<ProviderState> {
        self.states.get_mut().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.providers.iter().map(|p| p.id()).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &ids)
            .finish()
    }
}
