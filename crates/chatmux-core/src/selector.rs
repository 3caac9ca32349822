//! Round-robin selector with health-aware skipping

use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::provider::ChatProvider;
use crate::registry::ProviderRegistry;

/// A provider handed out by the selector
#[derive(Clone)]
pub struct Selection {
    pub(crate) index: usize,
    pub provider: Arc<dyn ChatProvider>,
}

impl Selection {
    pub fn id(&self) -> &str {
        self.provider.id()
    }
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("index", &self.index)
            .field("provider", &self.provider.id())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Cursor {
    /// Next candidate index, always in `[0, provider_count)`
    position: usize,
    advancements: u64,
}

/// Process-wide rotation cursor over a frozen registry.
///
/// Cursor advancement and the selection counters are updated under one lock,
/// taken before the registry's health lock, so concurrent callers each see a
/// distinct rotation slot.
#[derive(Debug)]
pub struct Selector {
    registry: Arc<ProviderRegistry>,
    cursor: Mutex<Cursor>,
}

impl Selector {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Next provider in rotation order, skipping ones in cooldown
    pub fn next(&self) -> Result<Selection, GatewayError> {
        self.next_excluding(&[])
    }

    /// Like [`Selector::next`], never returning an index in `exclude`.
    ///
    /// When no available provider remains, the least recently failed
    /// candidate is returned anyway. Fails with `NoProvidersRegistered` on an
    /// empty registry and `NoCandidate` when `exclude` covers every provider.
    pub fn next_excluding(&self, exclude: &[usize]) -> Result<Selection, GatewayError> {
        let count = self.registry.len();
        if count == 0 {
            return Err(GatewayError::NoProvidersRegistered);
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let mut states = self.registry.lock_states();
        let now = Instant::now();
        let start = cursor.position;

        let candidates = (0..count)
            .map(|offset| (start + offset) % count)
            .filter(|idx| !exclude.contains(idx));

        let mut fallback: Option<usize> = None;
        let mut chosen = None;
        for idx in candidates {
            if states[idx].is_available(now) {
                chosen = Some(idx);
                break;
            }
            // Earliest last_failure wins; ties keep rotation order
            let older = match fallback {
                None => true,
                Some(best) => states[idx].last_failure < states[best].last_failure,
            };
            if older {
                fallback = Some(idx);
            }
        }

        let index = match chosen.or(fallback) {
            Some(idx) => idx,
            None => {
                return Err(GatewayError::NoCandidate {
                    excluded: exclude.len(),
                });
            }
        };
        if chosen.is_none() {
            warn!(
                "No healthy provider available, degrading to least recently failed {}",
                states[index].provider_id
            );
        }

        cursor.position = (index + 1) % count;
        cursor.advancements += 1;
        states[index].selections += 1;
        debug!("Selected provider {} (slot {})", states[index].provider_id, index);

        Ok(Selection {
            index,
            provider: Arc::clone(self.registry.provider(index)),
        })
    }

    /// Total number of successful selections since startup
    pub fn advancements(&self) -> u64 {
        self.cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .advancements
    }

    /// Index the next rotation scan starts from
    pub fn position(&self) -> usize {
        self.cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CooldownPolicy;
    use crate::test_support::ScriptedProvider;
    use std::time::Duration;

    fn selector(ids: &[&str]) -> Selector {
        let providers = ids
            .iter()
            .map(|id| Arc::new(ScriptedProvider::ok(id, &["x"])) as Arc<dyn ChatProvider>);
        Selector::new(Arc::new(ProviderRegistry::from_providers(providers).unwrap()))
    }

    fn pick(selector: &Selector) -> String {
        selector.next().unwrap().id().to_string()
    }

    #[test]
    fn test_empty_registry() {
        let selector = Selector::new(Arc::new(ProviderRegistry::new()));
        assert!(matches!(
            selector.next(),
            Err(GatewayError::NoProvidersRegistered)
        ));
    }

    #[tokio::test]
    async fn test_rotation_order_and_fairness() {
        let selector = selector(&["a", "b", "c"]);
        let picks: Vec<String> = (0..10).map(|_| pick(&selector)).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c", "a", "b", "c", "a"]);

        let statuses = selector.registry().statuses();
        let counts: Vec<u64> = statuses.iter().map(|s| s.selections).collect();
        assert_eq!(counts, vec![4, 3, 3]);
        assert_eq!(selector.advancements(), 10);
        assert_eq!(selector.position(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_provider_in_cooldown() {
        let selector = selector(&["a", "b", "c"]);
        selector
            .registry()
            .report_failure(1, &CooldownPolicy::default());

        let picks: Vec<String> = (0..4).map(|_| pick(&selector)).collect();
        assert_eq!(picks, vec!["a", "c", "a", "c"]);

        tokio::time::advance(Duration::from_secs(1)).await;
        let picks: Vec<String> = (0..3).map(|_| pick(&selector)).collect();
        assert_eq!(picks, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrades_to_least_recently_failed() {
        let selector = selector(&["a", "b"]);
        let policy = CooldownPolicy::default();
        selector.registry().report_failure(1, &policy);
        tokio::time::advance(Duration::from_millis(10)).await;
        selector.registry().report_failure(0, &policy);

        assert_eq!(pick(&selector), "b");
        assert_eq!(selector.position(), 0);
    }

    #[tokio::test]
    async fn test_exclusion_forces_different_provider() {
        let selector = selector(&["a", "b", "c"]);
        let first = selector.next().unwrap();
        assert_eq!(first.id(), "a");

        // Cursor now points at b, but b is excluded
        let next = selector.next_excluding(&[0, 1]).unwrap();
        assert_eq!(next.id(), "c");

        assert!(matches!(
            selector.next_excluding(&[0, 1, 2]),
            Err(GatewayError::NoCandidate { excluded: 3 })
        ));
    }
}
