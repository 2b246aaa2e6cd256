//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus process-level concerns.

/// Rule file and runtime settings.
pub mod config;

/// Channel and JSON-lines event sources.
pub mod event_source;

/// Built-in hook listeners.
pub mod hooks;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Simulated, dry-run and retrying position managers.
pub mod position_manager;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
