//! Application Services
//!
//! Services that run the risk pipeline on top of the domain and ports.
//!
//! - `RuleEngine`: routes events to rules and handles breaches
//! - `AutoFlattenExecutor`: closes breaching positions, one in flight per contract
//! - `HookDispatcher`: fans lifecycle hooks out to listeners
//! - `FlowTracer`: records every flow and its steps
//! - `ReportGenerator`: builds the end-of-session summary
//! - `RiskSession`: feeds an event source through the engine with a worker pool
//! - `RiskPipeline`: wires the components above around one flow log

mod auto_flatten;
mod flow_tracer;
mod hook_dispatcher;
mod pipeline;
mod report;
mod rule_engine;
mod session;

pub use auto_flatten::{
    AutoFlattenExecutor, CLOSE_POSITION_METHOD, DEFAULT_API_TIMEOUT, FlattenError, FlattenRequest,
    FlattenResult, InFlightFlatten, InFlightGuard,
};
pub use flow_tracer::{Breakdown, FlowResult, FlowStatistics, FlowTracer, NamedCounts, TraceError};
pub use hook_dispatcher::{
    DEFAULT_LISTENER_TIMEOUT, DispatchReport, HookDispatcher, HookRegistry, ListenerOutcome,
};
pub use pipeline::{PipelineTimeouts, RiskPipeline};
pub use report::{
    FailedFlow, FailedHook, FlowDiagram, Percentiles, RECENT_FLOW_COUNT, ReportGenerator,
    SessionReport,
};
pub use rule_engine::{
    EngineStats, RuleEngine, RuleEngineError, RuleStats, StaleEvent, build_rules,
};
pub use session::{AdmittedObserver, RiskSession, SESSION_TIMEOUT_REASON, SessionConfig};
