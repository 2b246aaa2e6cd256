//! Session Report
//!
//! Pure consumer of tracer statistics and engine counters. Builds a
//! [`SessionReport`] that renders as text (via `Display`) or JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::flow_tracer::{FlowStatistics, FlowTracer, NamedCounts};
use super::rule_engine::{EngineStats, RuleEngine, RuleStats};
use crate::domain::flow::{Flow, FlowStatus, Stage};

/// Number of flows drawn in the flow diagram.
pub const RECENT_FLOW_COUNT: usize = 5;

/// Nearest-rank percentiles over a set of millisecond samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentiles {
    /// Number of samples.
    pub samples: usize,
    /// Median.
    pub p50_ms: f64,
    /// 90th percentile.
    pub p90_ms: f64,
    /// 99th percentile.
    pub p99_ms: f64,
    /// Maximum.
    pub max_ms: f64,
}

impl Percentiles {
    /// Compute percentiles, or `None` for an empty sample set.
    #[must_use]
    pub fn from_samples(mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);
        let max_ms = *samples.last()?;
        Some(Self {
            samples: samples.len(),
            p50_ms: nearest_rank(&samples, 50),
            p90_ms: nearest_rank(&samples, 90),
            p99_ms: nearest_rank(&samples, 99),
            max_ms,
        })
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn nearest_rank(sorted: &[f64], percentile: u32) -> f64 {
    let rank = (f64::from(percentile) / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// A flow that ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFlow {
    /// Flow id.
    pub flow_id: String,
    /// Flow type.
    pub flow_type: String,
    /// Triggering contract.
    pub contract_id: String,
    /// Failure reason.
    pub reason: String,
}

/// A hook dispatch with at least one failed listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedHook {
    /// Owning flow id.
    pub flow_id: String,
    /// Hook name.
    pub hook: String,
    /// Failed listener count.
    pub failed: u64,
    /// Listener errors.
    pub errors: Vec<String>,
}

/// Stage chain of one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDiagram {
    /// Short flow id.
    pub flow_id: String,
    /// Flow type.
    pub flow_type: String,
    /// Flow status.
    pub status: FlowStatus,
    /// Stages in order, annotated with hook or method names.
    pub stages: Vec<String>,
}

impl From<&Flow> for FlowDiagram {
    fn from(flow: &Flow) -> Self {
        let stages = flow
            .steps
            .iter()
            .map(|step| {
                let detail = match step.stage {
                    Stage::HookExec => step.data_str("hook"),
                    Stage::ApiCall => step.data_str("method"),
                    Stage::RiskEval => step.data_str("result"),
                    _ => None,
                };
                detail.map_or_else(
                    || step.stage.as_str().to_string(),
                    |detail| format!("{}({detail})", step.stage),
                )
            })
            .collect();
        Self {
            flow_id: flow.flow_id.short(),
            flow_type: flow.flow_type.clone(),
            status: flow.status,
            stages,
        }
    }
}

/// Session summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Tracer statistics over terminal flows.
    pub statistics: FlowStatistics,
    /// Engine counters.
    pub engine: EngineStats,
    /// Per-rule stats.
    pub rules: Vec<RuleStats>,
    /// Flow duration percentiles.
    pub flow_duration: Option<Percentiles>,
    /// Position manager latency percentiles.
    pub api_latency: Option<Percentiles>,
    /// Failed flows.
    pub failed_flows: Vec<FailedFlow>,
    /// Dispatches with failed listeners.
    pub failed_hooks: Vec<FailedHook>,
    /// Diagram of the most recent flows.
    pub recent_flows: Vec<FlowDiagram>,
}

impl SessionReport {
    /// Render as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds session reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    /// Build a report from live components.
    #[must_use]
    pub fn generate(tracer: &FlowTracer, engine: &RuleEngine) -> SessionReport {
        Self::from_parts(
            tracer.statistics(),
            engine.stats(),
            engine.rule_stats(),
            &tracer.flows(),
        )
    }

    /// Build a report from snapshots.
    #[must_use]
    pub fn from_parts(
        statistics: FlowStatistics,
        engine: EngineStats,
        rules: Vec<RuleStats>,
        flows: &[Flow],
    ) -> SessionReport {
        let terminal: Vec<&Flow> = flows.iter().filter(|f| f.status.is_terminal()).collect();

        let durations = terminal
            .iter()
            .filter_map(|flow| flow.duration())
            .map(|d| millis(d.num_microseconds().unwrap_or(i64::MAX)))
            .collect();

        let latencies = terminal
            .iter()
            .copied()
            .flat_map(|flow| flow.steps_at(Stage::ApiCall))
            .filter_map(|step| step.data.get("latencyMs").and_then(serde_json::Value::as_u64))
            .map(|ms| millis(i64::try_from(ms.saturating_mul(1000)).unwrap_or(i64::MAX)))
            .collect();

        let failed_flows = terminal
            .iter()
            .filter(|flow| flow.status == FlowStatus::Failed)
            .map(|flow| FailedFlow {
                flow_id: flow.flow_id.to_string(),
                flow_type: flow.flow_type.clone(),
                contract_id: flow.trigger.contract_id.to_string(),
                reason: flow.result.clone().unwrap_or_default(),
            })
            .collect();

        let failed_hooks = terminal
            .iter()
            .copied()
            .flat_map(|flow| flow.steps_at(Stage::HookExec))
            .filter_map(|step| {
                let failed = step.data.get("failed").and_then(serde_json::Value::as_u64)?;
                (failed > 0).then(|| FailedHook {
                    flow_id: step.flow_id.to_string(),
                    hook: step.data_str("hook").unwrap_or("unknown").to_string(),
                    failed,
                    errors: step
                        .data
                        .get("errors")
                        .and_then(serde_json::Value::as_array)
                        .map(|errors| {
                            errors
                                .iter()
                                .filter_map(|e| e.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            })
            .collect();

        let skip = flows.len().saturating_sub(RECENT_FLOW_COUNT);
        let recent_flows = flows.iter().skip(skip).map(FlowDiagram::from).collect();

        SessionReport {
            generated_at: Utc::now(),
            statistics,
            engine,
            rules,
            flow_duration: Percentiles::from_samples(durations),
            api_latency: Percentiles::from_samples(latencies),
            failed_flows,
            failed_hooks,
            recent_flows,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn millis(micros: i64) -> f64 {
    micros as f64 / 1000.0
}

// =============================================================================
// Text Rendering
// =============================================================================

const RULE: &str = "============================================================";

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.statistics;
        writeln!(f, "{RULE}")?;
        writeln!(f, "RISK GUARD SESSION REPORT  ({})", self.generated_at.to_rfc3339())?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Events Fired:          {}", stats.events_fired)?;
        writeln!(f, "Risk Rules Evaluated:  {}", stats.rules_evaluated)?;
        writeln!(f, "Hooks Triggered:       {}", stats.hooks_triggered)?;
        writeln!(f, "API Calls Made:        {}", stats.api_calls_made)?;
        writeln!(
            f,
            "Flows:                 {} completed, {} failed, {} running",
            stats.flows_completed, stats.flows_failed, stats.flows_running
        )?;
        writeln!(
            f,
            "Failures:              {} hook listeners, {} API calls",
            stats.hook_failures, stats.api_failures
        )?;

        let engine = &self.engine;
        writeln!(f, "\nEngine")?;
        writeln!(
            f,
            "  events received {} | evaluated {} | stale skipped {}",
            engine.events_received, engine.events_evaluated, engine.stale_events_skipped
        )?;
        writeln!(
            f,
            "  rule checks {} | breaches {} | rule errors {}",
            engine.rules_checked, engine.breaches_detected, engine.rule_errors
        )?;
        writeln!(
            f,
            "  flattens ok {} | failed {} | skipped {}",
            engine.flattens_succeeded, engine.flattens_failed, engine.flattens_skipped
        )?;

        if !self.rules.is_empty() {
            writeln!(f, "\nRules")?;
            for rule in &self.rules {
                writeln!(
                    f,
                    "  {:<22} {:<8} max {:<5} {:<6} auto_flatten={} breaches={}",
                    rule.rule_id.as_str(),
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.max_size,
                    rule.severity.as_str(),
                    rule.auto_flatten,
                    rule.breach_count
                )?;
            }
        }

        let breakdown = &stats.breakdown_by_name;
        write_counts(f, "Events by kind", &breakdown.events)?;
        write_counts(f, "Rules evaluated", &breakdown.rules)?;
        write_counts(f, "Hooks by name", &breakdown.hooks)?;
        write_counts(f, "API calls by method", &breakdown.api_calls)?;

        writeln!(f, "\nTiming")?;
        write_percentiles(f, "flow duration", self.flow_duration.as_ref())?;
        write_percentiles(f, "close latency", self.api_latency.as_ref())?;

        if !self.failed_flows.is_empty() {
            writeln!(f, "\nFailed flows")?;
            for failed in &self.failed_flows {
                writeln!(
                    f,
                    "  [{}] {} {}: {}",
                    &failed.flow_id[..8.min(failed.flow_id.len())],
                    failed.flow_type,
                    failed.contract_id,
                    failed.reason
                )?;
            }
        }

        if !self.failed_hooks.is_empty() {
            writeln!(f, "\nFailed hook listeners")?;
            for hook in &self.failed_hooks {
                writeln!(
                    f,
                    "  [{}] {} x{}: {}",
                    &hook.flow_id[..8.min(hook.flow_id.len())],
                    hook.hook,
                    hook.failed,
                    hook.errors.join("; ")
                )?;
            }
        }

        if !self.recent_flows.is_empty() {
            writeln!(f, "\nRecent flows")?;
            for diagram in &self.recent_flows {
                writeln!(
                    f,
                    "  [{}] {} {:?}\n      {}",
                    diagram.flow_id,
                    diagram.flow_type,
                    diagram.status,
                    diagram.stages.join(" -> ")
                )?;
            }
        }
        write!(f, "{RULE}")
    }
}

fn write_counts(f: &mut fmt::Formatter<'_>, title: &str, counts: &NamedCounts) -> fmt::Result {
    if counts.is_empty() {
        return Ok(());
    }
    writeln!(f, "\n{title}")?;
    for (name, count) in counts {
        writeln!(f, "  {name:<28} {count}")?;
    }
    Ok(())
}

fn write_percentiles(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    percentiles: Option<&Percentiles>,
) -> fmt::Result {
    match percentiles {
        Some(p) => writeln!(
            f,
            "  {label:<14} n={} p50={:.2}ms p90={:.2}ms p99={:.2}ms max={:.2}ms",
            p.samples, p.p50_ms, p.p90_ms, p.p99_ms, p.max_ms
        ),
        None => writeln!(f, "  {label:<14} no samples"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::services::flow_tracer::FlowResult;
    use crate::domain::event::{EventKind, TradingEvent, to_payload};

    fn event(sequence: u64) -> TradingEvent {
        TradingEvent::new(
            EventKind::PositionUpdated,
            "X",
            "ACC",
            to_payload(json!({"size": 5})),
            sequence,
        )
    }

    #[test]
    fn nearest_rank_percentiles() {
        let samples = (1..=100).map(f64::from).collect();
        let p = Percentiles::from_samples(samples).unwrap();
        assert_eq!(p.samples, 100);
        assert_eq!(p.p50_ms, 50.0);
        assert_eq!(p.p90_ms, 90.0);
        assert_eq!(p.p99_ms, 99.0);
        assert_eq!(p.max_ms, 100.0);
    }

    #[test]
    fn single_sample_percentiles() {
        let p = Percentiles::from_samples(vec![7.5]).unwrap();
        assert_eq!(p.p50_ms, 7.5);
        assert_eq!(p.p99_ms, 7.5);
        assert!(Percentiles::from_samples(Vec::new()).is_none());
    }

    #[test]
    fn failures_are_reported_separately() {
        let tracer = FlowTracer::new();

        let ok = tracer.start_flow("risk_check:max_contracts", &event(1));
        tracer
            .record_step(
                ok,
                Stage::HookExec,
                to_payload(json!({"hook": "on_breach", "failed": 0, "errors": []})),
            )
            .unwrap();
        tracer
            .complete_flow(ok, FlowResult::Completed("flattened".to_string()))
            .unwrap();

        let bad = tracer.start_flow("risk_check:max_contracts", &event(2));
        tracer
            .record_step(
                bad,
                Stage::HookExec,
                to_payload(json!({
                    "hook": "on_breach",
                    "failed": 1,
                    "errors": ["listener 'pager' failed: offline"],
                })),
            )
            .unwrap();
        tracer
            .record_step(
                bad,
                Stage::ApiCall,
                to_payload(json!({"method": "close_position_direct", "success": false, "latencyMs": 12})),
            )
            .unwrap();
        tracer
            .complete_flow(bad, FlowResult::Failed("close position failed".to_string()))
            .unwrap();

        let report = ReportGenerator::from_parts(
            tracer.statistics(),
            EngineStats::default(),
            Vec::new(),
            &tracer.flows(),
        );

        assert_eq!(report.failed_flows.len(), 1);
        assert_eq!(report.failed_flows[0].reason, "close position failed");
        assert_eq!(report.failed_hooks.len(), 1);
        assert_eq!(report.failed_hooks[0].errors.len(), 1);
        assert_eq!(report.statistics.flows_completed, 1);
        assert_eq!(report.statistics.flows_failed, 1);
        assert_eq!(report.api_latency.unwrap().max_ms, 12.0);

        let text = report.to_string();
        assert!(text.contains("Failed flows"));
        assert!(text.contains("Failed hook listeners"));
        assert!(text.contains("HOOK_EXEC(on_breach) -> API_CALL(close_position_direct)"));
    }

    #[test]
    fn recent_flows_are_capped() {
        let tracer = FlowTracer::new();
        for seq in 1..=8 {
            let id = tracer.start_flow("risk_check", &event(seq));
            tracer
                .complete_flow(id, FlowResult::Completed("no_breach".to_string()))
                .unwrap();
        }
        let report = ReportGenerator::from_parts(
            tracer.statistics(),
            EngineStats::default(),
            Vec::new(),
            &tracer.flows(),
        );
        assert_eq!(report.recent_flows.len(), RECENT_FLOW_COUNT);
        assert_eq!(report.recent_flows[0].stages, ["FLOW_START", "FLOW_END"]);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["statistics"]["eventsFired"], 8);
    }
}
