use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::debug;

use crate::errors::HarnessError;
use crate::model::ProviderId;
use crate::provider::ProviderAdapter;
use crate::session::{Session, SessionConfig};

/// Adapter registry shared by every session and run of one [`Harness`].
pub(crate) struct HarnessInner {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl HarnessInner {
    pub(crate) fn provider(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(id).cloned()
    }
}

/// Registry of provider adapters. Each run looks up the adapter named by its
/// [`ModelRef`](crate::ModelRef) and normalizes that adapter's stream into
/// [`StreamEvent`](crate::StreamEvent)s.
#[derive(Clone)]
pub struct Harness {
    pub(crate) inner: Arc<HarnessInner>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// True when an adapter is registered under `id`.
    pub fn has_provider(&self, id: &ProviderId) -> bool {
        self.inner.adapters.contains_key(id)
    }

    /// Registered adapter ids, sorted.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.inner.adapters.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Opens a session; its runs share usage totals.
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(self.inner.clone(), config)
    }
}

#[derive(Default)]
pub struct HarnessBuilder {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl HarnessBuilder {
    /// Adds an adapter. Its [`ProviderAdapter::id`] is the key runs address
    /// it by, so ids must be unique.
    pub fn register_provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Fails with [`HarnessError::Config`] when two adapters report the same
    /// id.
    pub fn build(self) -> Result<Harness, HarnessError> {
        let mut adapters = HashMap::with_capacity(self.adapters.len());
        for adapter in self.adapters {
            match adapters.entry(adapter.id()) {
                Entry::Occupied(entry) => {
                    return Err(HarnessError::Config(format!(
                        "provider adapter `{}` registered twice",
                        entry.key()
                    )));
                }
                Entry::Vacant(entry) => {
                    debug!(provider = %entry.key(), "registered provider adapter");
                    entry.insert(adapter);
                }
            }
        }
        Ok(Harness {
            inner: Arc::new(HarnessInner { adapters }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::{ProviderRequest, ProviderStreamHandle};

    struct NamedAdapter(&'static str);

    #[async_trait::async_trait]
    impl ProviderAdapter for NamedAdapter {
        fn id(&self) -> ProviderId {
            ProviderId::new(self.0)
        }

        async fn start_stream(
            &self,
            _req: ProviderRequest,
        ) -> Result<ProviderStreamHandle, ProviderError> {
            Err(ProviderError::transport(self.0, "never started in registry tests"))
        }
    }

    #[test]
    fn same_id_registered_twice_is_a_config_error() {
        let result = Harness::builder()
            .register_provider(Arc::new(NamedAdapter("proxy")))
            .register_provider(Arc::new(NamedAdapter("proxy")))
            .build();
        assert!(
            matches!(result, Err(HarnessError::Config(message)) if message.contains("`proxy` registered twice"))
        );
    }

    #[test]
    fn adapters_are_looked_up_by_id() {
        let harness = Harness::builder()
            .register_provider(Arc::new(NamedAdapter("zeta")))
            .register_provider(Arc::new(NamedAdapter("proxy")))
            .build()
            .expect("build harness");
        assert!(harness.has_provider(&ProviderId::new("proxy")));
        assert!(!harness.has_provider(&ProviderId::new("missing")));
        assert_eq!(
            harness.provider_ids(),
            vec![ProviderId::new("proxy"), ProviderId::new("zeta")]
        );
        let adapter = harness
            .inner
            .provider(&ProviderId::new("zeta"))
            .expect("registered adapter");
        assert_eq!(adapter.id(), ProviderId::new("zeta"));
    }
}
