use std::fmt;
use std::time::Duration;

use crate::usage::ModelPricing;

/// Stable identifier for a provider implementation (for example `proxy`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Model selection for a run.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelRef {
    /// Provider adapter that serves the model.
    pub provider: ProviderId,
    /// Provider-specific model name (for example `claude-sonnet-4`).
    pub model: String,
    /// Wire API family reported on the finished message (for example
    /// `anthropic-messages`). Adapters may override it in their response
    /// metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
}

impl ModelRef {
    /// Creates a model reference.
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api: None,
        }
    }

    /// Sets the API family label.
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = Some(api.into());
        self
    }
}

/// Generic run behavior options.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunOptions {
    /// Optional per-run deadline. When it elapses before a terminal event the
    /// run ends with an `error` event.
    pub timeout: Option<Duration>,
    /// Optional pricing used to fill in `usage.cost` when the provider does
    /// not report cost itself.
    pub pricing: Option<ModelPricing>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_options_default_has_no_deadline_or_pricing() {
        let options = RunOptions::default();
        assert!(options.timeout.is_none());
        assert!(options.pricing.is_none());
    }

    #[test]
    fn model_ref_api_is_optional_on_the_wire() {
        let value = serde_json::to_value(ModelRef::new("proxy", "m")).expect("serialize");
        assert!(value.get("api").is_none());
        let with_api = ModelRef::new("proxy", "m").with_api("openai-responses");
        assert_eq!(with_api.api.as_deref(), Some("openai-responses"));
    }
}
