//! Configuration Module
//!
//! Rule configuration is read once from a JSON file before the session
//! starts. Runtime knobs (worker count, timeouts, ports, input path) come from
//! the environment.
//!
//! # Usage
//!
//! ```rust,ignore
//! use risk_guard::infrastructure::config::{load_config, RuntimeSettings};
//!
//! let settings = RuntimeSettings::from_env();
//! let config = load_config(Some(settings.config_path.as_path()))?;
//! ```

mod settings;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::rules::{MaxContractsRule, RuleConfig, RuleId, Severity};

pub use settings::{DEFAULT_CONFIG_PATH, ReportFormat, RuntimeSettings};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse JSON configuration.
    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Settings that apply to the whole engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Default tracing filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log intended closes instead of performing them.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: default_dry_run(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_dry_run() -> bool {
    true
}

/// Complete rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Rule id to rule settings.
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
    /// Engine-wide settings.
    #[serde(default)]
    pub global: GlobalSettings,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let rule = RuleConfig::new(MaxContractsRule::ID, 2)
            .with_severity(Severity::High)
            .with_auto_flatten(true);
        Self {
            rules: BTreeMap::from([(MaxContractsRule::ID.to_string(), rule)]),
            global: GlobalSettings::default(),
        }
    }
}

impl RiskConfig {
    /// Rule configs in id order, including disabled ones.
    pub fn rule_configs(&self) -> impl Iterator<Item = RuleConfig> + '_ {
        self.rules.values().cloned()
    }

    /// Number of enabled rules.
    #[must_use]
    pub fn enabled_rules(&self) -> usize {
        self.rules.values().filter(|rule| rule.enabled).count()
    }
}

/// Load configuration from a JSON file.
///
/// A missing file yields [`RiskConfig::default`], which runs in dry-run mode.
/// Nothing is logged here: this runs before telemetry exists, so the caller
/// reports the outcome.
///
/// # Errors
///
/// Returns a `ConfigError` if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_config(path: Option<&Path>) -> Result<RiskConfig, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        return Ok(RiskConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a JSON string.
///
/// # Errors
///
/// Returns a `ConfigError` if the JSON cannot be parsed or validated.
pub fn load_config_from_string(json: &str) -> Result<RiskConfig, ConfigError> {
    let mut config: RiskConfig = serde_json::from_str(json)?;
    for (id, rule) in &mut config.rules {
        rule.rule_id = RuleId::new(id.as_str());
    }
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &RiskConfig) -> Result<(), ConfigError> {
    for (id, rule) in &config.rules {
        if id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rule ids must not be empty".to_string(),
            ));
        }
        if rule.max_size < 0 {
            return Err(ConfigError::ValidationError(format!(
                "rules.{id}.max_size must not be negative"
            )));
        }
    }

    if config.global.log_level.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "global.log_level must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    struct EventCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCounter {
        fn on_event(
            &self,
            _event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn events_emitted(f: impl FnOnce()) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(EventCounter(Arc::clone(&count)));
        tracing::subscriber::with_default(subscriber, f);
        count.load(Ordering::SeqCst)
    }

    const SAMPLE: &str = r#"{
        "rules": {
            "max_contracts": {
                "enabled": true,
                "max_size": 2,
                "severity": "high",
                "auto_flatten": true
            },
            "max_total_contracts": {
                "enabled": false,
                "max_size": 10
            }
        },
        "global": { "log_level": "debug", "dry_run": false }
    }"#;

    #[test]
    fn parses_rules_and_takes_ids_from_keys() {
        let config = load_config_from_string(SAMPLE).unwrap();

        let max = &config.rules["max_contracts"];
        assert_eq!(max.rule_id.as_str(), "max_contracts");
        assert_eq!(max.max_size, 2);
        assert_eq!(max.severity, Severity::High);
        assert!(max.auto_flatten);

        let total = &config.rules["max_total_contracts"];
        assert_eq!(total.rule_id.as_str(), "max_total_contracts");
        assert!(!total.enabled);
        assert_eq!(total.severity, Severity::Medium);
        assert!(!total.auto_flatten);

        assert_eq!(config.enabled_rules(), 1);
        assert_eq!(config.global.log_level, "debug");
        assert!(!config.global.dry_run);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = load_config_from_string("{}").unwrap();
        assert!(config.rules.is_empty());
        assert_eq!(config.global, GlobalSettings::default());
    }

    #[test]
    fn negative_limit_is_rejected() {
        let err = load_config_from_string(r#"{"rules": {"max_contracts": {"max_size": -1}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("max_contracts")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = load_config_from_string("{ rules: ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_falls_back_to_dry_run_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.json"))).unwrap();

        assert_eq!(config, RiskConfig::default());
        assert!(config.global.dry_run);
        assert!(config.rules.contains_key(MaxContractsRule::ID));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn loading_emits_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let emitted = events_emitted(|| {
            load_config(Some(&dir.path().join("absent.json"))).unwrap();
            load_config(Some(file.path())).unwrap();
        });
        assert_eq!(emitted, 0);

        let emitted = events_emitted(|| tracing::info!("sanity"));
        assert_eq!(emitted, 1);
    }
}
