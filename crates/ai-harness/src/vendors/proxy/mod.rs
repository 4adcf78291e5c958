//! Proxy provider integration.
//!
//! The proxy server performs the vendor call and streams canonical
//! `ProviderEvent`s back as SSE, so this adapter only frames and decodes.
mod adapter;
mod config;
mod options;
pub(crate) mod transport;

pub use adapter::ProxyProvider;
pub use config::ProxyClientConfig;
pub use options::{ProxyReasoning, ProxyRequestOptions};

use crate::ProviderId;
use crate::run::RunBuilder;

/// Extension trait for attaching proxy request options to a `RunBuilder`.
pub trait ProxyRunBuilderExt {
    /// Adds proxy request options for the current run.
    ///
    /// Stored under the `proxy` key and read by every `ProxyProvider`,
    /// whatever id it is registered under.
    fn proxy_options(self, options: ProxyRequestOptions) -> Self;
}

impl ProxyRunBuilderExt for RunBuilder {
    fn proxy_options(self, options: ProxyRequestOptions) -> Self {
        match serde_json::to_value(options) {
            Ok(value) => self.set_vendor_options_json(ProviderId::new(adapter::PROXY_PROVIDER), value),
            Err(err) => {
                tracing::warn!(error = %err, "dropping unserializable proxy options");
                self
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Harness, ModelRef, SessionConfig};
    use std::sync::Arc;

    #[test]
    fn proxy_run_builder_ext_stores_options_under_proxy_key() {
        let provider = ProxyProvider::new(ProxyClientConfig::new("http://127.0.0.1:9"))
            .expect("provider")
            .with_id("anthropic");
        let harness = Harness::builder()
            .register_provider(Arc::new(provider))
            .build()
            .expect("harness");
        let builder = harness
            .session(SessionConfig::named("t"))
            .run(ModelRef::new("anthropic", "claude-sonnet-4"))
            .user_text("hello")
            .proxy_options(ProxyRequestOptions::default().max_tokens(64));

        let value = builder
            .vendor_options_value(&ProviderId::new("proxy"))
            .expect("stored option");
        assert_eq!(value.get("maxTokens").and_then(|v| v.as_u64()), Some(64));
    }

    #[test]
    fn empty_base_url_is_a_config_error() {
        let err = ProxyProvider::new(ProxyClientConfig::new("  ")).err().expect("config error");
        assert!(matches!(err, crate::HarnessError::Config(_)));
    }
}
