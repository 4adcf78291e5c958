use std::time::Duration;

use crate::errors::HarnessError;

const URL_ENV: &str = "AI_PROXY_URL";
const TOKEN_ENV: &str = "AI_PROXY_TOKEN";

/// Configuration for the streaming proxy client.
#[derive(Clone, Debug)]
pub struct ProxyClientConfig {
    /// Base URL of the proxy server, without the `/api/stream` path.
    pub base_url: String,
    /// Bearer token sent with every request, if the proxy requires one.
    pub auth_token: Option<String>,
    /// Default HTTP timeout for a whole streamed response.
    pub timeout: Duration,
}

impl ProxyClientConfig {
    /// Creates a config for the given proxy base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Builds a config from `AI_PROXY_URL` and the optional `AI_PROXY_TOKEN`.
    pub fn from_env() -> Result<Self, HarnessError> {
        let base_url = std::env::var(URL_ENV).unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(HarnessError::Config(format!(
                "missing {URL_ENV} for proxy provider"
            )));
        }
        let config = Self::new(base_url.trim());
        Ok(match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => config.auth_token(token.trim()),
            _ => config,
        })
    }

    /// Overrides the proxy base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the bearer token.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn stream_url(&self) -> String {
        format!("{}/api/stream", self.base_url.trim_end_matches('/'))
    }
}
