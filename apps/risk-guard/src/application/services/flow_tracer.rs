//! Flow Tracer
//!
//! Records a correlated, time-ordered trace of every stage an event passes
//! through, and derives aggregate statistics from terminal flows.
//!
//! The tracer is an explicit instance shared behind an `Arc`; every component
//! that records steps receives it at construction.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::domain::event::{ContractId, Payload, TradingEvent, to_payload};
use crate::domain::flow::{Flow, FlowId, FlowStatus, FlowTrigger, Stage};

/// Tracer misuse. These are programming errors, never runtime conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// No flow with this id was started.
    #[error("unknown flow {0}")]
    UnknownFlow(FlowId),

    /// The flow already reached a terminal state.
    #[error("flow {flow_id} already completed with status {status:?}")]
    AlreadyCompleted {
        /// Flow id.
        flow_id: FlowId,
        /// Status it was completed with.
        status: FlowStatus,
    },
}

/// Terminal result passed to [`FlowTracer::complete_flow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    /// The chain finished.
    Completed(String),
    /// The chain errored.
    Failed(String),
}

impl FlowResult {
    const fn status(&self) -> FlowStatus {
        match self {
            Self::Completed(_) => FlowStatus::Completed,
            Self::Failed(_) => FlowStatus::Failed,
        }
    }

    fn into_message(self) -> String {
        match self {
            Self::Completed(message) | Self::Failed(message) => message,
        }
    }
}

/// Counts grouped by name.
pub type NamedCounts = BTreeMap<String, u64>;

/// Per-name breakdowns of traced activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    /// Distinct triggering events by kind.
    pub events: NamedCounts,
    /// Hook dispatches by hook name.
    pub hooks: NamedCounts,
    /// Position manager calls by method.
    pub api_calls: NamedCounts,
    /// Rule evaluations by rule id.
    pub rules: NamedCounts,
}

/// Aggregate statistics over terminal flows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatistics {
    /// Distinct events that opened a flow.
    pub events_fired: u64,
    /// Hook dispatches.
    pub hooks_triggered: u64,
    /// Position manager calls.
    pub api_calls_made: u64,
    /// Rule evaluations.
    pub rules_evaluated: u64,
    /// Flows that completed.
    pub flows_completed: u64,
    /// Flows that failed.
    pub flows_failed: u64,
    /// Flows still running (not part of the other counts).
    pub flows_running: u64,
    /// Listener invocations that failed across all dispatches.
    pub hook_failures: u64,
    /// Position manager calls that failed.
    pub api_failures: u64,
    /// Breakdown by name.
    pub breakdown_by_name: Breakdown,
}

#[derive(Debug, Default)]
struct TracerState {
    flows: HashMap<FlowId, Flow>,
    order: Vec<FlowId>,
}

/// Execution flow tracer.
#[derive(Debug, Default)]
pub struct FlowTracer {
    state: Mutex<TracerState>,
}

impl FlowTracer {
    /// Create an empty tracer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a running flow for `trigger` and record its `FLOW_START` step.
    pub fn start_flow(&self, flow_type: impl Into<String>, trigger: &TradingEvent) -> FlowId {
        let mut flow = Flow::start(flow_type, FlowTrigger::from(trigger));
        let flow_id = flow.flow_id;
        let data = to_payload(json!({
            "flowType": flow.flow_type,
            "eventKind": trigger.kind().as_str(),
            "contractId": trigger.contract_id(),
            "accountId": trigger.account_id(),
            "sequence": trigger.sequence(),
            "size": trigger.size(),
        }));
        flow.push_step(Stage::FlowStart, data, Utc::now());

        tracing::debug!(
            flow_id = %flow_id,
            flow_type = %flow.flow_type,
            contract_id = %trigger.contract_id(),
            "Flow started"
        );

        let mut state = self.state.lock();
        state.order.push(flow_id);
        state.flows.insert(flow_id, flow);
        flow_id
    }

    /// Append a step to a running flow.
    ///
    /// # Errors
    ///
    /// [`TraceError::UnknownFlow`] for an id never started, and
    /// [`TraceError::AlreadyCompleted`] for a terminal flow.
    pub fn record_step(&self, flow_id: FlowId, stage: Stage, data: Payload) -> Result<(), TraceError> {
        let mut state = self.state.lock();
        let flow = Self::running_flow(&mut state, flow_id)?;
        flow.push_step(stage, data, Utc::now());
        drop(state);

        tracing::trace!(flow_id = %flow_id, stage = %stage, "Step recorded");
        Ok(())
    }

    /// Record a step from pipeline code, logging misuse instead of returning it.
    ///
    /// A flow already closed by [`fail_running`](Self::fail_running) still has
    /// workers writing to it after a session timeout; those writes are dropped
    /// at debug.
    pub fn note(&self, flow_id: FlowId, stage: Stage, data: Payload) {
        match self.record_step(flow_id, stage, data) {
            Ok(()) => {}
            Err(e @ TraceError::AlreadyCompleted { .. }) => {
                tracing::debug!(error = %e, stage = %stage, "Dropped step for closed flow");
            }
            Err(e) => tracing::error!(error = %e, stage = %stage, "Failed to record flow step"),
        }
    }

    /// Complete a flow from pipeline code, logging misuse instead of returning
    /// it. A late completion of a closed flow is logged at debug, like
    /// [`note`](Self::note).
    pub fn settle(&self, flow_id: FlowId, result: FlowResult) {
        match self.complete_flow(flow_id, result) {
            Ok(()) => {}
            Err(e @ TraceError::AlreadyCompleted { .. }) => {
                tracing::debug!(error = %e, "Dropped completion for closed flow");
            }
            Err(e) => tracing::error!(error = %e, "Failed to complete flow"),
        }
    }

    /// Close a running flow and record its `FLOW_END` step.
    ///
    /// # Errors
    ///
    /// [`TraceError::UnknownFlow`] for an id never started, and
    /// [`TraceError::AlreadyCompleted`] when called a second time.
    pub fn complete_flow(&self, flow_id: FlowId, result: FlowResult) -> Result<(), TraceError> {
        let status = result.status();
        let message = result.into_message();

        let mut state = self.state.lock();
        let flow = Self::running_flow(&mut state, flow_id)?;
        let now = Utc::now();
        flow.push_step(
            Stage::FlowEnd,
            to_payload(json!({ "status": status, "result": message })),
            now,
        );
        flow.finish(status, message, now);
        drop(state);

        tracing::debug!(flow_id = %flow_id, status = ?status, "Flow completed");
        Ok(())
    }

    /// Fail every running flow with `reason`. Returns how many were failed.
    pub fn fail_running(&self, reason: &str) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();
        let mut failed = 0;
        for flow in state
            .flows
            .values_mut()
            .filter(|flow| flow.status == FlowStatus::Running)
        {
            flow.push_step(Stage::Error, to_payload(json!({ "error": reason })), now);
            flow.finish(FlowStatus::Failed, reason, now);
            failed += 1;
        }
        drop(state);

        if failed > 0 {
            tracing::warn!(failed, reason, "Running flows failed at session end");
        }
        failed
    }

    /// Snapshot of one flow.
    #[must_use]
    pub fn flow(&self, flow_id: FlowId) -> Option<Flow> {
        self.state.lock().flows.get(&flow_id).cloned()
    }

    /// Snapshot of every flow in start order.
    #[must_use]
    pub fn flows(&self) -> Vec<Flow> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.flows.get(id).cloned())
            .collect()
    }

    /// Snapshot of the last `count` flows in start order.
    #[must_use]
    pub fn recent_flows(&self, count: usize) -> Vec<Flow> {
        let state = self.state.lock();
        let skip = state.order.len().saturating_sub(count);
        state
            .order
            .iter()
            .skip(skip)
            .filter_map(|id| state.flows.get(id).cloned())
            .collect()
    }

    /// Number of flows still running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .flows
            .values()
            .filter(|flow| flow.status == FlowStatus::Running)
            .count()
    }

    /// Aggregate statistics over all terminal flows.
    #[must_use]
    pub fn statistics(&self) -> FlowStatistics {
        let state = self.state.lock();
        let mut stats = FlowStatistics::default();
        let mut seen_events: HashSet<(&ContractId, u64)> = HashSet::new();

        for flow in state.flows.values() {
            match flow.status {
                FlowStatus::Running => {
                    stats.flows_running += 1;
                    continue;
                }
                FlowStatus::Completed => stats.flows_completed += 1,
                FlowStatus::Failed => stats.flows_failed += 1,
            }

            if seen_events.insert((&flow.trigger.contract_id, flow.trigger.sequence)) {
                stats.events_fired += 1;
                bump(&mut stats.breakdown_by_name.events, flow.trigger.kind.as_str());
            }

            for step in &flow.steps {
                match step.stage {
                    Stage::RiskEval => {
                        stats.rules_evaluated += 1;
                        bump(
                            &mut stats.breakdown_by_name.rules,
                            step.data_str("rule").unwrap_or("unknown"),
                        );
                    }
                    Stage::HookExec => {
                        stats.hooks_triggered += 1;
                        stats.hook_failures += step
                            .data
                            .get("failed")
                            .and_then(serde_json::Value::as_u64)
                            .unwrap_or(0);
                        bump(
                            &mut stats.breakdown_by_name.hooks,
                            step.data_str("hook").unwrap_or("unknown"),
                        );
                    }
                    Stage::ApiCall => {
                        stats.api_calls_made += 1;
                        if step.data.get("success") != Some(&serde_json::Value::Bool(true)) {
                            stats.api_failures += 1;
                        }
                        bump(
                            &mut stats.breakdown_by_name.api_calls,
                            step.data_str("method").unwrap_or("unknown"),
                        );
                    }
                    Stage::FlowStart
                    | Stage::EvalDetail
                    | Stage::Error
                    | Stage::FlowEnd => {}
                }
            }
        }
        stats
    }

    fn running_flow(state: &mut TracerState, flow_id: FlowId) -> Result<&mut Flow, TraceError> {
        let flow = state.flows.get_mut(&flow_id).ok_or_else(|| {
            tracing::warn!(flow_id = %flow_id, "Step recorded against unknown flow");
            TraceError::UnknownFlow(flow_id)
        })?;
        if flow.status.is_terminal() {
            return Err(TraceError::AlreadyCompleted {
                flow_id,
                status: flow.status,
            });
        }
        Ok(flow)
    }
}

fn bump(counts: &mut NamedCounts, name: &str) {
    *counts.entry(name.to_string()).or_default() += 1;
}
