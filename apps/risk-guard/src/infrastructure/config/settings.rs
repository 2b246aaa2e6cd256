//! Runtime Settings
//!
//! Process-level settings loaded from environment variables.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{DEFAULT_API_TIMEOUT, DEFAULT_LISTENER_TIMEOUT, SessionConfig};

/// Rule file used when `RISK_GUARD_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/risk_config.json";

/// Output format of the session report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl ReportFormat {
    /// Parse format from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Path of the JSON rule file.
    pub config_path: PathBuf,
    /// Maximum events evaluated concurrently.
    pub workers: usize,
    /// Bound on each position manager call.
    pub api_timeout: Duration,
    /// Bound on each hook listener invocation.
    pub hook_timeout: Duration,
    /// Wait for in-flight work at session end.
    pub shutdown_grace: Duration,
    /// Prometheus scrape port, if the listener should run.
    pub metrics_port: Option<u16>,
    /// JSON-lines replay file; stdin when unset.
    pub events_path: Option<PathBuf>,
    /// Report output format.
    pub report_format: ReportFormat,
    /// Close attempts for transient failures (0 = no retry layer).
    pub retry_attempts: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            workers: session.workers,
            api_timeout: DEFAULT_API_TIMEOUT,
            hook_timeout: DEFAULT_LISTENER_TIMEOUT,
            shutdown_grace: session.shutdown_grace,
            metrics_port: None,
            events_path: None,
            report_format: ReportFormat::Text,
            retry_attempts: 0,
        }
    }
}

impl RuntimeSettings {
    /// Create settings from environment variables. Unset or unparsable
    /// values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create settings from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            config_path: lookup("RISK_GUARD_CONFIG")
                .filter(|v| !v.is_empty())
                .map_or(defaults.config_path, PathBuf::from),
            workers: parse_var(&lookup, "RISK_GUARD_WORKERS", defaults.workers).max(1),
            api_timeout: parse_duration_millis(
                &lookup,
                "RISK_GUARD_API_TIMEOUT_MS",
                defaults.api_timeout,
            ),
            hook_timeout: parse_duration_millis(
                &lookup,
                "RISK_GUARD_HOOK_TIMEOUT_MS",
                defaults.hook_timeout,
            ),
            shutdown_grace: parse_duration_secs(
                &lookup,
                "RISK_GUARD_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace,
            ),
            metrics_port: lookup("RISK_GUARD_METRICS_PORT").and_then(|v| v.parse().ok()),
            events_path: lookup("RISK_GUARD_EVENTS")
                .filter(|v| !v.is_empty() && v != "-")
                .map(PathBuf::from),
            report_format: lookup("RISK_GUARD_REPORT_FORMAT")
                .map(|v| ReportFormat::from_str_case_insensitive(&v))
                .unwrap_or_default(),
            retry_attempts: parse_var(
                &lookup,
                "RISK_GUARD_RETRY_ATTEMPTS",
                defaults.retry_attempts,
            ),
        }
    }

    /// Session worker pool settings.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            workers: self.workers,
            shutdown_grace: self.shutdown_grace,
        }
    }

    /// Prometheus listen address, if enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port
            .map(|port| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> RuntimeSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RuntimeSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = settings(&[]);
        assert_eq!(settings, RuntimeSettings::default());
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.api_timeout, Duration::from_millis(5000));
        assert_eq!(settings.hook_timeout, Duration::from_millis(2000));
        assert_eq!(settings.shutdown_grace, Duration::from_secs(10));
        assert!(settings.metrics_addr().is_none());
        assert!(settings.events_path.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let settings = settings(&[
            ("RISK_GUARD_CONFIG", "/etc/risk.json"),
            ("RISK_GUARD_WORKERS", "2"),
            ("RISK_GUARD_API_TIMEOUT_MS", "250"),
            ("RISK_GUARD_HOOK_TIMEOUT_MS", "100"),
            ("RISK_GUARD_SHUTDOWN_GRACE_SECS", "3"),
            ("RISK_GUARD_METRICS_PORT", "9464"),
            ("RISK_GUARD_EVENTS", "events.jsonl"),
            ("RISK_GUARD_REPORT_FORMAT", "JSON"),
            ("RISK_GUARD_RETRY_ATTEMPTS", "3"),
        ]);

        assert_eq!(settings.config_path, PathBuf::from("/etc/risk.json"));
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.api_timeout, Duration::from_millis(250));
        assert_eq!(settings.hook_timeout, Duration::from_millis(100));
        assert_eq!(settings.session_config().shutdown_grace, Duration::from_secs(3));
        assert_eq!(settings.metrics_addr().map(|a| a.port()), Some(9464));
        assert_eq!(settings.events_path, Some(PathBuf::from("events.jsonl")));
        assert_eq!(settings.report_format, ReportFormat::Json);
        assert_eq!(settings.retry_attempts, 3);
    }

    #[test]
    fn invalid_values_fall_back() {
        let settings = settings(&[
            ("RISK_GUARD_WORKERS", "0"),
            ("RISK_GUARD_API_TIMEOUT_MS", "soon"),
            ("RISK_GUARD_EVENTS", "-"),
            ("RISK_GUARD_REPORT_FORMAT", "yaml"),
        ]);

        assert_eq!(settings.workers, 1);
        assert_eq!(settings.api_timeout, DEFAULT_API_TIMEOUT);
        assert!(settings.events_path.is_none());
        assert_eq!(settings.report_format, ReportFormat::Text);
    }
}
