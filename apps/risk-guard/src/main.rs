//! Risk Guard Binary
//!
//! Replays a JSON-lines trading event feed through the risk engine and
//! prints the session report.
//!
//! # Usage
//!
//! ```bash
//! RISK_GUARD_EVENTS=events.jsonl cargo run --bin risk-guard
//! tail -f feed.jsonl | cargo run --bin risk-guard
//! ```
//!
//! # Environment Variables
//!
//! - `RISK_GUARD_CONFIG`: Rule file (default: config/risk_config.json)
//! - `RISK_GUARD_EVENTS`: JSON-lines event file (default: stdin)
//! - `RISK_GUARD_WORKERS`: Concurrent event evaluations (default: 8)
//! - `RISK_GUARD_API_TIMEOUT_MS`: Position manager call timeout (default: 5000)
//! - `RISK_GUARD_HOOK_TIMEOUT_MS`: Hook listener timeout (default: 2000)
//! - `RISK_GUARD_SHUTDOWN_GRACE_SECS`: Wait for in-flight events (default: 10)
//! - `RISK_GUARD_METRICS_PORT`: Prometheus scrape port (default: disabled)
//! - `RISK_GUARD_REPORT_FORMAT`: text | json (default: text)
//! - `RISK_GUARD_RETRY_ATTEMPTS`: Close retries on transient errors (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: risk-guard)
//! - `RUST_LOG`: Log filter (default: the config's `global.log_level`)

use std::sync::Arc;

use anyhow::Context;
use risk_guard::application::ports::{EventSourcePort, HookListener, PositionManagerPort};
use risk_guard::application::services::{
    HookRegistry, PipelineTimeouts, RiskPipeline, SessionReport,
};
use risk_guard::infrastructure::config::{
    ReportFormat, RiskConfig, RuntimeSettings, load_config,
};
use risk_guard::infrastructure::event_source::JsonLinesEventSource;
use risk_guard::infrastructure::hooks::{LOGGED_HOOKS, LoggingListener};
use risk_guard::infrastructure::metrics::init_metrics;
use risk_guard::infrastructure::position_manager::{
    DryRunPositionManager, RetryPolicy, RetryingPositionManager, SimulatedPositionManager,
};
use risk_guard::infrastructure::telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let settings = RuntimeSettings::from_env();
    // The log level comes from the config, so it is loaded before telemetry
    // and its outcome is logged below.
    let config = load_config(Some(settings.config_path.as_path()));

    let log_level = config
        .as_ref()
        .map_or_else(|_| "info".to_string(), |c| c.global.log_level.clone());
    let _telemetry_guard = telemetry::init(&log_level);

    let config = config.context("failed to load risk config")?;
    if !settings.config_path.exists() {
        tracing::warn!(
            path = %settings.config_path.display(),
            "Config file not found, running with defaults (dry run)"
        );
    }

    tracing::info!("Starting Risk Guard");
    log_config(&settings, &config);

    let _metrics_handle =
        init_metrics(settings.metrics_addr()).context("failed to initialize metrics")?;

    let simulator = Arc::new(SimulatedPositionManager::new());
    let position_manager = build_position_manager(&settings, &config, &simulator);

    let logging: Arc<dyn HookListener> = Arc::new(LoggingListener);
    let registry = HookRegistry::new().register_all(LOGGED_HOOKS, &logging);

    let pipeline = RiskPipeline::build(
        config.rule_configs(),
        registry,
        position_manager,
        PipelineTimeouts {
            api: settings.api_timeout,
            hook: settings.hook_timeout,
        },
    )
    .context("failed to build rule engine")?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let observed = Arc::clone(&simulator);
    let session = pipeline
        .session(settings.session_config(), shutdown_token)
        .with_admitted_observer(move |event| observed.observe(event));

    let report = match &settings.events_path {
        Some(path) => {
            let source = JsonLinesEventSource::open(path)
                .await
                .with_context(|| format!("failed to open event file '{}'", path.display()))?;
            run(&session, source).await
        }
        None => {
            tracing::info!("Reading events from stdin");
            let source = JsonLinesEventSource::stdin();
            run(&session, source).await
        }
    };

    print_report(&report, settings.report_format)?;
    tracing::info!("Risk Guard stopped");
    Ok(())
}

async fn run<S: EventSourcePort>(
    session: &risk_guard::RiskSession,
    mut source: S,
) -> SessionReport {
    session.run(&mut source).await
}

fn build_position_manager(
    settings: &RuntimeSettings,
    config: &RiskConfig,
    simulator: &Arc<SimulatedPositionManager>,
) -> Arc<dyn PositionManagerPort> {
    let base: Arc<dyn PositionManagerPort> = if config.global.dry_run {
        tracing::warn!("Dry run enabled, positions will not be closed");
        Arc::new(DryRunPositionManager::new())
    } else {
        tracing::info!("Closing positions against the in-memory simulator");
        Arc::clone(simulator) as Arc<dyn PositionManagerPort>
    };

    if settings.retry_attempts == 0 {
        return base;
    }
    Arc::new(RetryingPositionManager::new(
        base,
        RetryPolicy::with_attempts(settings.retry_attempts),
    ))
}

fn print_report(report: &SessionReport, format: ReportFormat) -> anyhow::Result<()> {
    match format {
        ReportFormat::Text => println!("{report}"),
        ReportFormat::Json => {
            let json = report.to_json().context("failed to serialize report")?;
            println!("{json}");
        }
    }
    Ok(())
}

fn log_config(settings: &RuntimeSettings, config: &RiskConfig) {
    tracing::info!(
        config_path = %settings.config_path.display(),
        rules = config.rules.len(),
        enabled_rules = config.enabled_rules(),
        dry_run = config.global.dry_run,
        workers = settings.workers,
        api_timeout_ms = u64::try_from(settings.api_timeout.as_millis()).unwrap_or(u64::MAX),
        hook_timeout_ms = u64::try_from(settings.hook_timeout.as_millis()).unwrap_or(u64::MAX),
        retry_attempts = settings.retry_attempts,
        "Configuration loaded"
    );
    for rule in config.rules.values() {
        tracing::info!(
            rule_id = %rule.rule_id,
            enabled = rule.enabled,
            max_size = rule.max_size,
            severity = rule.severity.as_str(),
            auto_flatten = rule.auto_flatten,
            "Rule configured"
        );
    }
}

fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
