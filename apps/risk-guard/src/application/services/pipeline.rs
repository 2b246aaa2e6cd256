//! Risk pipeline assembly.
//!
//! Wires one tracer, dispatcher, executor and engine together so every
//! component records into the same flow log.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::auto_flatten::{AutoFlattenExecutor, DEFAULT_API_TIMEOUT};
use super::flow_tracer::FlowTracer;
use super::hook_dispatcher::{DEFAULT_LISTENER_TIMEOUT, HookDispatcher, HookRegistry};
use super::rule_engine::{RuleEngine, RuleEngineError, build_rules};
use super::session::{RiskSession, SessionConfig};
use crate::application::ports::PositionManagerPort;
use crate::domain::rules::RuleConfig;

/// Timeouts applied by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeouts {
    /// Bound on each position manager call.
    pub api: Duration,
    /// Bound on each hook listener invocation.
    pub hook: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            api: DEFAULT_API_TIMEOUT,
            hook: DEFAULT_LISTENER_TIMEOUT,
        }
    }
}

/// Shared components of one risk pipeline.
#[derive(Debug, Clone)]
pub struct RiskPipeline {
    /// Flow log.
    pub tracer: Arc<FlowTracer>,
    /// Hook dispatcher.
    pub dispatcher: HookDispatcher,
    /// Auto-flatten executor.
    pub executor: Arc<AutoFlattenExecutor>,
    /// Rule engine.
    pub engine: Arc<RuleEngine>,
}

impl RiskPipeline {
    /// Build the pipeline from rule configs, a frozen hook registry and a
    /// position manager.
    ///
    /// # Errors
    ///
    /// Returns [`RuleEngineError::UnknownRule`] if a config names a rule with
    /// no implementation.
    pub fn build(
        rules: impl IntoIterator<Item = RuleConfig>,
        registry: HookRegistry,
        position_manager: Arc<dyn PositionManagerPort>,
        timeouts: PipelineTimeouts,
    ) -> Result<Self, RuleEngineError> {
        let rules = build_rules(rules)?;
        let tracer = Arc::new(FlowTracer::new());
        let dispatcher = HookDispatcher::new(Arc::new(registry), timeouts.hook);
        let executor = Arc::new(AutoFlattenExecutor::new(
            position_manager,
            dispatcher.clone(),
            Arc::clone(&tracer),
            timeouts.api,
        ));
        let engine = Arc::new(RuleEngine::new(
            rules,
            Arc::clone(&tracer),
            dispatcher.clone(),
            Arc::clone(&executor),
        ));

        Ok(Self {
            tracer,
            dispatcher,
            executor,
            engine,
        })
    }

    /// Session over this pipeline.
    #[must_use]
    pub fn session(&self, config: SessionConfig, shutdown: CancellationToken) -> RiskSession {
        RiskSession::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.tracer),
            config,
            shutdown,
        )
    }
}
