//! Session Replay Integration Tests
//!
//! Runs full sessions over channel and JSON-lines sources and checks the
//! resulting session reports.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use risk_guard::application::services::{
    HookRegistry, PipelineTimeouts, RiskPipeline, SESSION_TIMEOUT_REASON,
};
use risk_guard::infrastructure::event_source::{JsonLinesEventSource, event_channel};
use risk_guard::infrastructure::position_manager::SimulatedPositionManager;
use risk_guard::{
    ContractId, EventKind, FlowStatus, MaxContractsRule, PositionManagerPort, RuleConfig,
    SessionConfig, TradingEvent,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn pipeline(manager: Arc<dyn PositionManagerPort>, api_timeout: Duration) -> RiskPipeline {
    RiskPipeline::build(
        [RuleConfig::new(MaxContractsRule::ID, 2).with_auto_flatten(true)],
        HookRegistry::new(),
        manager,
        PipelineTimeouts {
            api: api_timeout,
            ..PipelineTimeouts::default()
        },
    )
    .unwrap()
}

fn session_config(shutdown_grace: Duration) -> SessionConfig {
    SessionConfig {
        workers: 4,
        shutdown_grace,
    }
}

#[tokio::test]
async fn channel_session_reports_every_flow() {
    let manager = Arc::new(SimulatedPositionManager::new());
    let pipeline = pipeline(manager.clone(), Duration::from_secs(5));
    let session = pipeline.session(
        session_config(Duration::from_secs(5)),
        CancellationToken::new(),
    );

    let (publisher, mut source) = event_channel(16);
    for (contract, size) in [("MNQ", 1), ("MES", 4), ("MNQ", 2)] {
        publisher
            .publish(
                EventKind::PositionUpdated,
                contract,
                "ACC-1",
                json!({ "size": size }).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
    }
    drop(publisher);

    let report = session.run(&mut source).await;

    assert_eq!(report.engine.events_received, 3);
    assert_eq!(report.engine.events_evaluated, 3);
    assert_eq!(report.engine.breaches_detected, 1);
    assert_eq!(report.statistics.flows_completed, 3);
    assert_eq!(report.statistics.events_fired, 3);
    assert_eq!(report.statistics.api_calls_made, 1);
    assert!(report.failed_flows.is_empty());
    assert_eq!(report.recent_flows.len(), 3);
    assert_eq!(report.rules[0].breach_count, 1);

    let closes = manager.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].contract_id, ContractId::new("MES"));
}

#[tokio::test]
async fn out_of_order_replay_skips_stale_events() {
    let manager = Arc::new(SimulatedPositionManager::new());
    let pipeline = pipeline(manager.clone(), Duration::from_secs(5));
    let session = pipeline.session(
        session_config(Duration::from_secs(5)),
        CancellationToken::new(),
    );

    let (publisher, mut source) = event_channel(16);
    for sequence in [1, 2, 1] {
        publisher
            .send(TradingEvent::new(
                EventKind::OrderFilled,
                "MNQ",
                "ACC-1",
                json!({ "size": 1 }).as_object().cloned().unwrap(),
                sequence,
            ))
            .await
            .unwrap();
    }
    drop(publisher);

    let report = session.run(&mut source).await;

    assert_eq!(report.engine.events_received, 3);
    assert_eq!(report.engine.stale_events_skipped, 1);
    assert_eq!(report.statistics.flows_completed, 2);
}

#[tokio::test]
async fn json_lines_replay_tracks_and_flattens_positions() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# recorded feed").unwrap();
    writeln!(
        file,
        r#"{{"type":"position_updated","contract_id":"MNQ","account_id":"ACC-1","data":{{"size":1,"unrealized_pnl":12.5}}}}"#
    )
    .unwrap();
    writeln!(file, "not an event").unwrap();
    writeln!(
        file,
        r#"{{"kind":"ORDER_FILLED","contractId":"MNQ","accountId":"ACC-1","payload":{{"size":3,"unrealized_pnl":-40.0}}}}"#
    )
    .unwrap();
    file.flush().unwrap();

    let manager = Arc::new(SimulatedPositionManager::new());
    let pipeline = pipeline(manager.clone(), Duration::from_secs(5));
    let observed = Arc::clone(&manager);
    let session = pipeline
        .session(
            session_config(Duration::from_secs(5)),
            CancellationToken::new(),
        )
        .with_admitted_observer(move |event: &TradingEvent| observed.observe(event));

    let mut source = JsonLinesEventSource::open(file.path()).await.unwrap();

    let report = session.run(&mut source).await;

    assert_eq!(report.engine.events_received, 2);
    assert_eq!(report.engine.flattens_succeeded, 1);
    assert_eq!(report.statistics.api_calls_made, 1);
    assert!(report.api_latency.is_some());
    assert_eq!(manager.position(&ContractId::new("MNQ")), Some(0));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["statistics"]["apiCallsMade"], 1);
    assert_eq!(json["statistics"]["rulesEvaluated"], 2);
}

#[tokio::test]
async fn stale_replay_leaves_tracked_position_untouched() {
    let manager = Arc::new(SimulatedPositionManager::new());
    let pipeline = RiskPipeline::build(
        [RuleConfig::new(MaxContractsRule::ID, 10).with_auto_flatten(true)],
        HookRegistry::new(),
        manager.clone(),
        PipelineTimeouts::default(),
    )
    .unwrap();
    let observed = Arc::clone(&manager);
    let session = pipeline
        .session(
            session_config(Duration::from_secs(5)),
            CancellationToken::new(),
        )
        .with_admitted_observer(move |event: &TradingEvent| observed.observe(event));

    let (publisher, mut source) = event_channel(4);
    for (size, sequence) in [(5, 2), (1, 1)] {
        publisher
            .send(TradingEvent::new(
                EventKind::PositionUpdated,
                "MNQ",
                "ACC-1",
                json!({ "size": size }).as_object().cloned().unwrap(),
                sequence,
            ))
            .await
            .unwrap();
    }
    drop(publisher);

    let report = session.run(&mut source).await;

    assert_eq!(report.engine.stale_events_skipped, 1);
    assert!(manager.closes().is_empty());
    assert_eq!(manager.position(&ContractId::new("MNQ")), Some(5));
}

#[tokio::test]
async fn unfinished_flows_fail_when_grace_period_ends() {
    let manager =
        Arc::new(SimulatedPositionManager::new().with_latency(Duration::from_secs(30)));
    let pipeline = pipeline(manager, Duration::from_secs(60));
    let session = pipeline.session(
        session_config(Duration::from_millis(50)),
        CancellationToken::new(),
    );

    let (publisher, mut source) = event_channel(4);
    publisher
        .publish(
            EventKind::PositionUpdated,
            "MNQ",
            "ACC-1",
            json!({ "size": 5 }).as_object().cloned().unwrap(),
        )
        .await
        .unwrap();
    drop(publisher);

    let report = session.run(&mut source).await;

    assert_eq!(report.statistics.flows_failed, 1);
    assert_eq!(report.statistics.flows_running, 0);
    assert_eq!(report.failed_flows.len(), 1);
    assert_eq!(report.failed_flows[0].reason, SESSION_TIMEOUT_REASON);
    assert_eq!(report.failed_flows[0].contract_id, "MNQ");
    assert!(
        pipeline
            .tracer
            .flows()
            .iter()
            .all(|flow| flow.status == FlowStatus::Failed)
    );
}

#[tokio::test]
async fn cancellation_stops_a_live_feed() {
    let manager = Arc::new(SimulatedPositionManager::new());
    let pipeline = pipeline(manager, Duration::from_secs(5));
    let shutdown = CancellationToken::new();
    let session = pipeline.session(session_config(Duration::from_secs(1)), shutdown.clone());

    let (publisher, mut source) = event_channel(4);
    publisher
        .publish(
            EventKind::PositionUpdated,
            "MNQ",
            "ACC-1",
            json!({ "size": 1 }).as_object().cloned().unwrap(),
        )
        .await
        .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), session.run(&mut source))
        .await
        .unwrap();

    assert_eq!(report.engine.events_received, 1);
    assert_eq!(report.statistics.flows_completed, 1);
    drop(publisher);
}
