//! Flow Model
//!
//! A [`Flow`] is one traced execution path from a single event through rule
//! evaluation, hooks, and (optionally) a position manager call. Steps are
//! append-only and their timestamps never decrease.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{AccountId, ContractId, EventKind, Payload, TradingEvent};

/// Opaque correlation token linking all steps of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(Uuid);

impl FlowId {
    /// Allocate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in diagrams and logs.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Still executing.
    Running,
    /// Finished normally.
    Completed,
    /// Errored or timed out.
    Failed,
}

impl FlowStatus {
    /// Whether the flow has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Stage names recorded by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Flow opened for an event.
    FlowStart,
    /// A rule evaluated the event.
    RiskEval,
    /// Detail produced while evaluating or remediating.
    EvalDetail,
    /// A hook was dispatched to its listeners.
    HookExec,
    /// The position manager was called.
    ApiCall,
    /// Something failed.
    Error,
    /// Flow closed.
    FlowEnd,
}

impl Stage {
    /// Wire name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FlowStart => "FLOW_START",
            Self::RiskEval => "RISK_EVAL",
            Self::EvalDetail => "EVAL_DETAIL",
            Self::HookExec => "HOOK_EXEC",
            Self::ApiCall => "API_CALL",
            Self::Error => "ERROR",
            Self::FlowEnd => "FLOW_END",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded stage of a flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    /// Owning flow.
    pub flow_id: FlowId,
    /// Record time, never earlier than the previous step's.
    pub timestamp: DateTime<Utc>,
    /// Stage reached.
    pub stage: Stage,
    /// Stage data.
    pub data: Payload,
}

impl ExecutionStep {
    /// String field from the step data.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Summary of the event that opened a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTrigger {
    /// Event kind.
    pub kind: EventKind,
    /// Event contract.
    pub contract_id: ContractId,
    /// Event account.
    pub account_id: AccountId,
    /// Event sequence.
    pub sequence: u64,
    /// Size carried by the event, if any.
    pub size: Option<i64>,
}

impl From<&TradingEvent> for FlowTrigger {
    fn from(event: &TradingEvent) -> Self {
        Self {
            kind: event.kind(),
            contract_id: event.contract_id().clone(),
            account_id: event.account_id().clone(),
            sequence: event.sequence(),
            size: event.size(),
        }
    }
}

/// A traced execution path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Correlation id.
    pub flow_id: FlowId,
    /// Flow category (e.g. `risk_check:max_contracts`).
    pub flow_type: String,
    /// Triggering event summary.
    pub trigger: FlowTrigger,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time once terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: FlowStatus,
    /// Terminal result description.
    pub result: Option<String>,
    /// Recorded steps in append order.
    pub steps: Vec<ExecutionStep>,
}

impl Flow {
    /// Open a running flow.
    #[must_use]
    pub fn start(flow_type: impl Into<String>, trigger: FlowTrigger) -> Self {
        Self {
            flow_id: FlowId::generate(),
            flow_type: flow_type.into(),
            trigger,
            started_at: Utc::now(),
            ended_at: None,
            status: FlowStatus::Running,
            result: None,
            steps: Vec::new(),
        }
    }

    /// Append a step stamped at `now`, clamped to keep timestamps ordered.
    pub fn push_step(&mut self, stage: Stage, data: Payload, now: DateTime<Utc>) {
        let floor = self
            .steps
            .last()
            .map_or(self.started_at, |step| step.timestamp);
        self.steps.push(ExecutionStep {
            flow_id: self.flow_id,
            timestamp: now.max(floor),
            stage,
            data,
        });
    }

    /// Mark the flow terminal.
    pub fn finish(&mut self, status: FlowStatus, result: impl Into<String>, now: DateTime<Utc>) {
        let floor = self
            .steps
            .last()
            .map_or(self.started_at, |step| step.timestamp);
        self.ended_at = Some(now.max(floor));
        self.status = status;
        self.result = Some(result.into());
    }

    /// Wall time between start and end, if terminal.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|ended| ended - self.started_at)
    }

    /// Steps at the given stage.
    pub fn steps_at(&self, stage: Stage) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(move |step| step.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn trigger() -> FlowTrigger {
        FlowTrigger {
            kind: EventKind::PositionUpdated,
            contract_id: ContractId::new("X"),
            account_id: AccountId::new("ACC"),
            sequence: 1,
            size: Some(5),
        }
    }

    #[test]
    fn push_step_clamps_backwards_clock() {
        let mut flow = Flow::start("risk_check", trigger());
        let t0 = flow.started_at + Duration::milliseconds(10);
        flow.push_step(Stage::FlowStart, Payload::new(), t0);
        flow.push_step(Stage::RiskEval, Payload::new(), t0 - Duration::milliseconds(5));

        assert_eq!(flow.steps[1].timestamp, t0);
        assert!(flow.steps.iter().all(|step| step.flow_id == flow.flow_id));
    }

    #[test]
    fn finish_sets_terminal_state() {
        let mut flow = Flow::start("risk_check", trigger());
        let now = flow.started_at + Duration::milliseconds(3);
        flow.finish(FlowStatus::Failed, "boom", now);

        assert!(flow.status.is_terminal());
        assert_eq!(flow.result.as_deref(), Some("boom"));
        assert_eq!(flow.duration(), Some(Duration::milliseconds(3)));
    }

    #[test]
    fn flow_ids_are_unique() {
        assert_ne!(FlowId::generate(), FlowId::generate());
        assert_eq!(FlowId::generate().short().len(), 8);
    }
}
