//! Prometheus Metrics Module
//!
//! Exposes risk pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Events**: events received by kind, stale events skipped
//! - **Rules**: evaluations by outcome, breaches by rule and severity
//! - **Hooks**: listener outcomes by hook
//! - **Flatten**: outcomes, in-flight count, position manager latency
//!
//! # Integration
//!
//! When a listen address is given the exporter serves `/metrics` itself.
//! Recording without an installed recorder is a no-op, so services record
//! unconditionally.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::event::EventKind;
use crate::domain::rules::Severity;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and return its handle.
///
/// With `listen` set, the exporter also serves `/metrics` on that address;
/// this must be called from inside a Tokio runtime. Later calls return the
/// first handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (e.g., port already
/// in use or another recorder is set).
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = match listen {
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new()
                .with_http_listener(addr)
                .build()
                .map_err(|e| MetricsError::Configuration(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| MetricsError::Installation(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "Metrics exporter stopped");
                }
            });
            tracing::info!(addr = %addr, "Prometheus metrics exporter started");
            handle
        }
        None => {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| MetricsError::Installation(e.to_string()))?;
            handle
        }
    };

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "risk_guard_events_received_total",
        "Total events delivered by the event source"
    );
    describe_counter!(
        "risk_guard_stale_events_total",
        "Events skipped because their sequence did not advance"
    );
    describe_counter!(
        "risk_guard_rule_evaluations_total",
        "Rule evaluations by rule and outcome"
    );
    describe_counter!(
        "risk_guard_breaches_total",
        "Breaches detected by rule and severity"
    );
    describe_counter!(
        "risk_guard_hook_invocations_total",
        "Listener invocations by hook and outcome"
    );
    describe_counter!(
        "risk_guard_flatten_total",
        "Auto-flatten attempts by outcome"
    );
    describe_gauge!(
        "risk_guard_flatten_in_flight",
        "Contracts currently being flattened"
    );
    describe_histogram!(
        "risk_guard_close_position_seconds",
        "Position manager close latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for rule evaluation outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// No breach.
    Pass,
    /// Breach detected.
    Breach,
    /// The rule failed.
    Error,
}

impl EvaluationOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Breach => "breach",
            Self::Error => "error",
        }
    }
}

/// Metric labels for flatten outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenOutcome {
    /// Position closed.
    Success,
    /// Close failed or timed out.
    Failed,
    /// Rejected because a flatten was already running.
    Duplicate,
}

impl FlattenOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Record an event received from the source.
pub fn record_event_received(kind: EventKind) {
    counter!("risk_guard_events_received_total", "kind" => kind.as_str()).increment(1);
}

/// Record a stale event skip.
pub fn record_stale_event() {
    counter!("risk_guard_stale_events_total").increment(1);
}

/// Record one rule evaluation.
pub fn record_rule_evaluation(rule_id: &str, outcome: EvaluationOutcome) {
    counter!(
        "risk_guard_rule_evaluations_total",
        "rule" => rule_id.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a breach.
pub fn record_breach(rule_id: &str, severity: Severity) {
    counter!(
        "risk_guard_breaches_total",
        "rule" => rule_id.to_string(),
        "severity" => severity.as_str()
    )
    .increment(1);
}

/// Record listener outcomes for one dispatch.
pub fn record_hook_dispatch(hook: &str, succeeded: u64, failed: u64) {
    counter!(
        "risk_guard_hook_invocations_total",
        "hook" => hook.to_string(),
        "outcome" => "success"
    )
    .increment(succeeded);
    counter!(
        "risk_guard_hook_invocations_total",
        "hook" => hook.to_string(),
        "outcome" => "failed"
    )
    .increment(failed);
}

/// Record a flatten outcome.
pub fn record_flatten(outcome: FlattenOutcome) {
    counter!("risk_guard_flatten_total", "outcome" => outcome.as_str()).increment(1);
}

/// Update the in-flight flatten gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_flatten_in_flight(count: usize) {
    gauge!("risk_guard_flatten_in_flight").set(count as f64);
}

/// Record position manager close latency.
pub fn record_close_latency(duration: Duration) {
    histogram!("risk_guard_close_position_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(EvaluationOutcome::Pass.as_str(), "pass");
        assert_eq!(EvaluationOutcome::Breach.as_str(), "breach");
        assert_eq!(EvaluationOutcome::Error.as_str(), "error");
        assert_eq!(FlattenOutcome::Success.as_str(), "success");
        assert_eq!(FlattenOutcome::Failed.as_str(), "failed");
        assert_eq!(FlattenOutcome::Duplicate.as_str(), "duplicate");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_event_received(EventKind::OrderFilled);
        record_flatten(FlattenOutcome::Success);
        set_flatten_in_flight(0);
        assert!(get_metrics_handle().is_none());
    }
}
