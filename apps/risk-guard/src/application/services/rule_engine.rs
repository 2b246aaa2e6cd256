//! Rule Engine
//!
//! Routes each event to every enabled rule and handles the resulting
//! breaches. Every rule evaluation opens its own flow; all rules see the same
//! event and position snapshot, and a failing rule never stops the others.
//! Breach flows for one event are handled concurrently.
//!
//! Events whose per-contract sequence does not advance are rejected as
//! [`StaleEvent`] before any rule runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use super::auto_flatten::{AutoFlattenExecutor, FlattenRequest};
use super::flow_tracer::{FlowResult, FlowTracer};
use super::hook_dispatcher::HookDispatcher;
use crate::application::ports::HookName;
use crate::domain::event::{ContractId, TradingEvent, to_payload};
use crate::domain::flow::{FlowId, Stage};
use crate::domain::position::{PositionBook, PositionState};
use crate::domain::rules::{BreachDecision, Rule, RuleConfig, RuleId, Severity, build_rule};
use crate::infrastructure::metrics::{self, EvaluationOutcome};

/// Engine construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleEngineError {
    /// No implementation is registered for the rule id.
    #[error("unknown rule '{0}'")]
    UnknownRule(RuleId),
}

/// An event whose sequence did not advance past the last one processed for
/// its contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stale event for {contract_id}: sequence {sequence} <= last processed {last_sequence}")]
pub struct StaleEvent {
    /// Contract of the event.
    pub contract_id: ContractId,
    /// Sequence carried by the event.
    pub sequence: u64,
    /// Highest sequence already processed for the contract.
    pub last_sequence: u64,
}

/// Build rule implementations for each config entry.
///
/// # Errors
///
/// Returns [`RuleEngineError::UnknownRule`] for an id with no implementation.
pub fn build_rules(
    configs: impl IntoIterator<Item = RuleConfig>,
) -> Result<Vec<Box<dyn Rule>>, RuleEngineError> {
    configs
        .into_iter()
        .map(|config| {
            let id = config.rule_id.clone();
            build_rule(config).ok_or(RuleEngineError::UnknownRule(id))
        })
        .collect()
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Events handed to the engine.
    pub events_received: u64,
    /// Events that went through rule evaluation.
    pub events_evaluated: u64,
    /// Events rejected as stale.
    pub stale_events_skipped: u64,
    /// Individual rule checks.
    pub rules_checked: u64,
    /// Breaches detected.
    pub breaches_detected: u64,
    /// Rule checks that errored.
    pub rule_errors: u64,
    /// Flattens that closed the position.
    pub flattens_succeeded: u64,
    /// Flattens that failed.
    pub flattens_failed: u64,
    /// Flattens rejected as already in flight.
    pub flattens_skipped: u64,
}

/// Per-rule view of configuration and breach count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    /// Rule id.
    pub rule_id: RuleId,
    /// Whether the rule is evaluated.
    pub enabled: bool,
    /// Configured limit.
    pub max_size: i64,
    /// Configured severity.
    pub severity: Severity,
    /// Whether breaches auto-flatten.
    pub auto_flatten: bool,
    /// Breaches detected by this rule.
    pub breach_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    events_evaluated: AtomicU64,
    stale_events_skipped: AtomicU64,
    rules_checked: AtomicU64,
    breaches_detected: AtomicU64,
    rule_errors: AtomicU64,
    flattens_succeeded: AtomicU64,
    flattens_failed: AtomicU64,
    flattens_skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_evaluated: self.events_evaluated.load(Ordering::Relaxed),
            stale_events_skipped: self.stale_events_skipped.load(Ordering::Relaxed),
            rules_checked: self.rules_checked.load(Ordering::Relaxed),
            breaches_detected: self.breaches_detected.load(Ordering::Relaxed),
            rule_errors: self.rule_errors.load(Ordering::Relaxed),
            flattens_succeeded: self.flattens_succeeded.load(Ordering::Relaxed),
            flattens_failed: self.flattens_failed.load(Ordering::Relaxed),
            flattens_skipped: self.flattens_skipped.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.events_received,
            &self.events_evaluated,
            &self.stale_events_skipped,
            &self.rules_checked,
            &self.breaches_detected,
            &self.rule_errors,
            &self.flattens_succeeded,
            &self.flattens_failed,
            &self.flattens_skipped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

struct RegisteredRule {
    rule: Box<dyn Rule>,
    breaches: AtomicU64,
}

/// Position risk rule engine.
pub struct RuleEngine {
    rules: Vec<RegisteredRule>,
    positions: Mutex<PositionBook>,
    last_sequence: Mutex<HashMap<ContractId, u64>>,
    counters: Counters,
    tracer: Arc<FlowTracer>,
    dispatcher: HookDispatcher,
    executor: Arc<AutoFlattenExecutor>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.rules.iter().map(|r| r.rule.id().as_str()).collect();
        f.debug_struct("RuleEngine")
            .field("rules", &ids)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Create an engine over `rules`.
    #[must_use]
    pub fn new(
        rules: Vec<Box<dyn Rule>>,
        tracer: Arc<FlowTracer>,
        dispatcher: HookDispatcher,
        executor: Arc<AutoFlattenExecutor>,
    ) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| RegisteredRule {
                rule,
                breaches: AtomicU64::new(0),
            })
            .collect();
        Self {
            rules,
            positions: Mutex::new(PositionBook::new()),
            last_sequence: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            tracer,
            dispatcher,
            executor,
        }
    }

    /// Number of enabled rules.
    #[must_use]
    pub fn enabled_rules(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| r.rule.config().enabled)
            .count()
    }

    /// Evaluate `event` against every enabled rule and handle each breach.
    ///
    /// Equivalent to [`admit`](Self::admit) followed by
    /// [`evaluate_admitted`](Self::evaluate_admitted).
    ///
    /// # Errors
    ///
    /// Returns [`StaleEvent`] if the event's sequence does not advance for its
    /// contract; nothing else is touched in that case.
    pub async fn evaluate(&self, event: &TradingEvent) -> Result<Vec<BreachDecision>, StaleEvent> {
        let state = self.admit(event)?;
        Ok(self.evaluate_admitted(event, &state).await)
    }

    /// Accept an event in arrival order: reject it if stale, otherwise apply
    /// it to the position book and return the resulting snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StaleEvent`] if the event's sequence does not advance for its
    /// contract.
    pub fn admit(&self, event: &TradingEvent) -> Result<PositionState, StaleEvent> {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_received(event.kind());

        if let Err(stale) = self.advance_sequence(event) {
            self.counters
                .stale_events_skipped
                .fetch_add(1, Ordering::Relaxed);
            metrics::record_stale_event();
            tracing::debug!(
                contract_id = %stale.contract_id,
                sequence = stale.sequence,
                last_sequence = stale.last_sequence,
                "Skipping stale event"
            );
            return Err(stale);
        }

        Ok(self.positions.lock().apply(event))
    }

    /// Run every enabled rule against an admitted event and handle breaches.
    ///
    /// Returns the breaches detected, in rule registration order. Kinds that
    /// rules do not apply to return no breaches and open no flows.
    pub async fn evaluate_admitted(
        &self,
        event: &TradingEvent,
        state: &PositionState,
    ) -> Vec<BreachDecision> {
        if !event.kind().is_evaluated() {
            return Vec::new();
        }
        self.counters
            .events_evaluated
            .fetch_add(1, Ordering::Relaxed);

        let breaches: Vec<(FlowId, BreachDecision)> = self
            .rules
            .iter()
            .filter(|registered| registered.rule.config().enabled)
            .filter_map(|registered| self.check_rule(registered, event, state))
            .collect();

        join_all(
            breaches
                .iter()
                .map(|(flow_id, decision)| self.handle_breach(*flow_id, decision)),
        )
        .await;

        breaches.into_iter().map(|(_, decision)| decision).collect()
    }

    /// Current position snapshot for an event's account and contract.
    #[must_use]
    pub fn position_state(&self, event: &TradingEvent) -> PositionState {
        self.positions
            .lock()
            .state(event.account_id(), event.contract_id())
    }

    /// Engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Per-rule configuration and breach counts.
    #[must_use]
    pub fn rule_stats(&self) -> Vec<RuleStats> {
        self.rules
            .iter()
            .map(|registered| {
                let config = registered.rule.config();
                RuleStats {
                    rule_id: config.rule_id.clone(),
                    enabled: config.enabled,
                    max_size: config.max_size,
                    severity: config.severity,
                    auto_flatten: config.auto_flatten,
                    breach_count: registered.breaches.load(Ordering::Relaxed),
                }
            })
            .collect()
    }

    /// Zero every counter, including per-rule breach counts.
    pub fn reset_stats(&self) {
        self.counters.reset();
        for registered in &self.rules {
            registered.breaches.store(0, Ordering::Relaxed);
        }
        tracing::info!("Rule engine statistics reset");
    }

    fn advance_sequence(&self, event: &TradingEvent) -> Result<(), StaleEvent> {
        let mut last_sequence = self.last_sequence.lock();
        if let Some(&last) = last_sequence.get(event.contract_id())
            && event.sequence() <= last
        {
            return Err(StaleEvent {
                contract_id: event.contract_id().clone(),
                sequence: event.sequence(),
                last_sequence: last,
            });
        }
        last_sequence.insert(event.contract_id().clone(), event.sequence());
        Ok(())
    }

    /// Run one rule in its own flow. Returns the flow and decision on breach;
    /// other outcomes complete the flow here.
    fn check_rule(
        &self,
        registered: &RegisteredRule,
        event: &TradingEvent,
        state: &PositionState,
    ) -> Option<(FlowId, BreachDecision)> {
        let rule_id = registered.rule.id();
        let limit = registered.rule.config().max_size;
        let flow_id = self
            .tracer
            .start_flow(format!("risk_check:{rule_id}"), event);
        self.counters.rules_checked.fetch_add(1, Ordering::Relaxed);

        match registered.rule.check(event, state) {
            Ok(None) => {
                metrics::record_rule_evaluation(rule_id.as_str(), EvaluationOutcome::Pass);
                self.tracer.note(
                    flow_id,
                    Stage::RiskEval,
                    to_payload(json!({
                        "rule": rule_id,
                        "result": "pass",
                        "size": state.contract_size,
                        "limit": limit,
                    })),
                );
                self.complete(flow_id, FlowResult::Completed("no_breach".to_string()));
                None
            }
            Ok(Some(decision)) => {
                metrics::record_rule_evaluation(rule_id.as_str(), EvaluationOutcome::Breach);
                metrics::record_breach(rule_id.as_str(), decision.severity);
                self.counters
                    .breaches_detected
                    .fetch_add(1, Ordering::Relaxed);
                registered.breaches.fetch_add(1, Ordering::Relaxed);
                self.tracer.note(
                    flow_id,
                    Stage::RiskEval,
                    to_payload(json!({
                        "rule": rule_id,
                        "result": "breach",
                        "size": decision.current_size,
                        "limit": decision.limit,
                    })),
                );
                Some((flow_id, decision))
            }
            Err(e) => {
                metrics::record_rule_evaluation(rule_id.as_str(), EvaluationOutcome::Error);
                self.counters.rule_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    rule_id = %rule_id,
                    contract_id = %event.contract_id(),
                    sequence = event.sequence(),
                    error = %e,
                    "Rule evaluation failed"
                );
                self.tracer.note(
                    flow_id,
                    Stage::RiskEval,
                    to_payload(json!({ "rule": rule_id, "result": "error" })),
                );
                self.tracer.note(
                    flow_id,
                    Stage::Error,
                    to_payload(json!({ "rule": rule_id, "error": e.to_string() })),
                );
                self.complete(flow_id, FlowResult::Failed(e.to_string()));
                None
            }
        }
    }

    async fn handle_breach(&self, flow_id: FlowId, decision: &BreachDecision) {
        log_breach(decision);
        self.tracer.note(
            flow_id,
            Stage::EvalDetail,
            to_payload(json!({ "action": "breach_detected", "decision": decision })),
        );

        let on_breach = self
            .dispatcher
            .dispatch(
                &HookName::ON_BREACH,
                to_payload(json!({
                    "ruleId": decision.rule_id,
                    "contractId": decision.contract_id,
                    "accountId": decision.account_id,
                    "currentSize": decision.current_size,
                    "limit": decision.limit,
                    "severity": decision.severity,
                    "autoFlatten": decision.auto_flatten,
                })),
            )
            .await;
        self.tracer
            .note(flow_id, Stage::HookExec, on_breach.to_step_data());

        if !(decision.auto_flatten && decision.exceeds_limit()) {
            self.complete(flow_id, FlowResult::Completed("breach_logged".to_string()));
            return;
        }

        let request = FlattenRequest {
            contract_id: decision.contract_id.clone(),
            account_id: decision.account_id.clone(),
            reason: decision.reason(),
            current_size: decision.current_size,
        };
        let result = self.executor.flatten(flow_id, request).await;

        let outcome = if result.success {
            self.counters
                .flattens_succeeded
                .fetch_add(1, Ordering::Relaxed);
            FlowResult::Completed("flattened".to_string())
        } else if result.is_duplicate() {
            self.counters
                .flattens_skipped
                .fetch_add(1, Ordering::Relaxed);
            FlowResult::Completed("flatten_skipped: duplicate in flight".to_string())
        } else {
            self.counters.flattens_failed.fetch_add(1, Ordering::Relaxed);
            let message = result
                .error
                .as_ref()
                .map_or_else(|| "flatten failed".to_string(), ToString::to_string);
            self.tracer.note(
                flow_id,
                Stage::Error,
                to_payload(json!({ "error": message })),
            );
            FlowResult::Failed(message)
        };
        self.complete(flow_id, outcome);
    }

    fn complete(&self, flow_id: FlowId, result: FlowResult) {
        self.tracer.settle(flow_id, result);
    }
}

fn log_breach(decision: &BreachDecision) {
    match decision.severity {
        Severity::High => tracing::error!(
            rule_id = %decision.rule_id,
            contract_id = %decision.contract_id,
            account_id = %decision.account_id,
            size = decision.current_size,
            limit = decision.limit,
            severity = decision.severity.as_str(),
            auto_flatten = decision.auto_flatten,
            "Risk limit breached"
        ),
        Severity::Medium => tracing::warn!(
            rule_id = %decision.rule_id,
            contract_id = %decision.contract_id,
            account_id = %decision.account_id,
            size = decision.current_size,
            limit = decision.limit,
            severity = decision.severity.as_str(),
            auto_flatten = decision.auto_flatten,
            "Risk limit breached"
        ),
    }
}
