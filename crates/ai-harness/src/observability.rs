use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_ENV: &str = "AI_HARNESS_OBSERVABILITY_ENABLED";
const LEVEL_ENV: &str = "AI_HARNESS_LOG_LEVEL";
const JSON_LOG_PATH_ENV: &str = "AI_HARNESS_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "ai-harness.logs.jsonl";

/// Logging setup resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Filter directive (`info`, `ai_harness=debug`, ...). `None` defers to
    /// `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// When set, logs go to this file as JSON lines instead of the console.
    pub json_log_path: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: None,
            json_log_path: None,
        }
    }
}

impl ObservabilityConfig {
    /// Reads `AI_HARNESS_OBSERVABILITY_ENABLED`, `AI_HARNESS_LOG_LEVEL` and
    /// `AI_HARNESS_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value: &String| !value.trim().is_empty());
        Self {
            enabled: lookup(ENABLED_ENV)
                .map(|value| parse_bool_env(&value).unwrap_or(true))
                .unwrap_or(true),
            level: non_empty(LEVEL_ENV),
            json_log_path: non_empty(JSON_LOG_PATH_ENV).map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Installs the global `tracing` subscriber from the environment, once per
/// process. Later calls, or an already installed subscriber, leave things as
/// they are.
///
/// Environment variables:
/// - `AI_HARNESS_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `AI_HARNESS_LOG_LEVEL`: level/filter override.
/// - `AI_HARNESS_JSON_LOG_PATH`: JSONL log file; console (stderr) when unset.
/// - `RUST_LOG`: filter used when no level override is set.
pub fn init_observability() {
    init_observability_with(ObservabilityConfig::from_env());
}

/// Same as [`init_observability`] with an explicit config.
pub fn init_observability_with(config: ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }

        let env_filter = config.env_filter();
        match &config.json_log_path {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let _ = std::fs::create_dir_all(dir);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ObservabilityConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilityConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_enabled_console_logging() {
        assert_eq!(config_from(&[]), ObservabilityConfig::default());
    }

    #[test]
    fn reads_flag_level_and_path() {
        let config = config_from(&[
            (ENABLED_ENV, "off"),
            (LEVEL_ENV, "ai_harness=debug"),
            (JSON_LOG_PATH_ENV, "/tmp/logs/harness.jsonl"),
        ]);
        assert!(!config.enabled);
        assert_eq!(config.level.as_deref(), Some("ai_harness=debug"));
        assert_eq!(
            config.json_log_path,
            Some(PathBuf::from("/tmp/logs/harness.jsonl"))
        );
    }

    #[test]
    fn unknown_flag_values_keep_logging_on() {
        assert!(config_from(&[(ENABLED_ENV, "maybe")]).enabled);
        assert!(config_from(&[(LEVEL_ENV, "  ")]).level.is_none());
        assert_eq!(parse_bool_env(" YES "), Some(true));
        assert_eq!(parse_bool_env("0"), Some(false));
    }

    #[test]
    fn init_is_idempotent() {
        let disabled = ObservabilityConfig {
            enabled: false,
            ..ObservabilityConfig::default()
        };
        init_observability_with(disabled.clone());
        init_observability_with(disabled);
        assert!(INIT.get().is_some());
    }
}
