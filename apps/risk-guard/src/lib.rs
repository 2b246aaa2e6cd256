#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Risk Guard - Position Risk Enforcement
//!
//! Evaluates a stream of broker trading events against configurable position
//! risk rules. A breach fires lifecycle hooks and, when configured, closes
//! the offending position through the position manager. Every evaluation is
//! recorded as a traced flow and summarized in a session report.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Events, positions, rules and flow records
//!   - `event`: Trading events and identifiers
//!   - `position`: Position book and per-event snapshots
//!   - `rules`: Rule trait, rule configs, breach decisions
//!   - `flow`: Flow and step records
//!
//! - **Application**: Services and port definitions
//!   - `ports`: Event source, position manager and hook listener interfaces
//!   - `services`: Rule engine, auto-flatten, hook dispatch, tracing, reports
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `config`: Rule file and runtime settings
//!   - `event_source`: Channel and JSON-lines sources
//!   - `position_manager`: Simulated, dry-run and retrying managers
//!   - `hooks`: Built-in listeners
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Logging and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                ┌─────────────┐     ┌─────────────┐
//! Event Source ─►│ RiskSession │────►│ RuleEngine  │──► rules (one flow each)
//!                └─────────────┘     └──────┬──────┘
//!                                           │ breach
//!                                           ▼
//!                ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//!  Listeners ◄───│    Hook     │◄────│ AutoFlatten │────►│ Position Manager │
//!                │ Dispatcher  │     │  Executor   │     └──────────────────┘
//!                └─────────────┘     └─────────────┘
//!                        │                  │
//!                        └──────► FlowTracer ◄──────┘──► SessionReport
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core risk types with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event::{AccountId, ContractId, EventKind, Payload, TradingEvent};
pub use domain::flow::{ExecutionStep, Flow, FlowId, FlowStatus, Stage};
pub use domain::position::{PositionBook, PositionState};
pub use domain::rules::{
    BreachDecision, MaxContractsRule, MaxTotalContractsRule, Rule, RuleConfig, RuleId, Severity,
};

// Ports
pub use application::ports::{
    ClosePositionRequest, ClosePositionResponse, EventSourceError, EventSourcePort, HookError,
    HookListener, HookName, PositionManagerError, PositionManagerPort, Subscription,
};

// Services
pub use application::services::{
    AutoFlattenExecutor, FlowStatistics, FlowTracer, HookDispatcher, HookRegistry,
    PipelineTimeouts, ReportGenerator, RiskPipeline, RiskSession, RuleEngine, SessionConfig,
    SessionReport,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, GlobalSettings, ReportFormat, RiskConfig, RuntimeSettings, load_config,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
