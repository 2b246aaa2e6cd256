//! Risk Session
//!
//! Drives events from an [`EventSourcePort`] through the [`RuleEngine`].
//!
//! Events are admitted one at a time in arrival order, so per-contract
//! sequence checks and the position book see the feed as delivered. Rule
//! evaluation and remediation for each admitted event then run as a separate
//! task, bounded by the worker count.
//!
//! An optional observer sees each admitted event in arrival order, after the
//! stale check, so downstream state never moves backwards.
//!
//! When the source is exhausted or the session is cancelled, in-flight tasks
//! get a grace period; flows still running after it are marked failed before
//! the report is built.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::flow_tracer::FlowTracer;
use super::report::{ReportGenerator, SessionReport};
use super::rule_engine::RuleEngine;
use crate::application::ports::{EventSourcePort, Subscription};
use crate::domain::event::TradingEvent;

/// Result recorded on flows still running when the session ends.
pub const SESSION_TIMEOUT_REASON: &str = "session ended before flow completed (timeout)";

/// Worker pool and shutdown settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum events evaluated concurrently.
    pub workers: usize,
    /// How long to wait for in-flight events once input stops.
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Callback run for every admitted event.
pub type AdmittedObserver = Arc<dyn Fn(&TradingEvent) + Send + Sync>;

/// One run of the risk pipeline over an event source.
pub struct RiskSession {
    engine: Arc<RuleEngine>,
    tracer: Arc<FlowTracer>,
    config: SessionConfig,
    shutdown: CancellationToken,
    on_admitted: Option<AdmittedObserver>,
}

impl std::fmt::Debug for RiskSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskSession")
            .field("config", &self.config)
            .field("cancelled", &self.shutdown.is_cancelled())
            .field("observed", &self.on_admitted.is_some())
            .finish_non_exhaustive()
    }
}

impl RiskSession {
    /// Create a session. Cancelling `shutdown` stops intake of new events.
    #[must_use]
    pub const fn new(
        engine: Arc<RuleEngine>,
        tracer: Arc<FlowTracer>,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            tracer,
            config,
            shutdown,
            on_admitted: None,
        }
    }

    /// Call `observer` with each event that passes the stale check, before it
    /// is evaluated. Skipped and stale events are never observed.
    #[must_use]
    pub fn with_admitted_observer(
        mut self,
        observer: impl Fn(&TradingEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_admitted = Some(Arc::new(observer));
        self
    }

    /// Engine driven by this session.
    #[must_use]
    pub const fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Consume `source` until it is exhausted or the session is cancelled,
    /// then drain in-flight work and build the session report.
    pub async fn run<S>(&self, source: &mut S) -> SessionReport
    where
        S: EventSourcePort + ?Sized,
    {
        source.subscribe(Subscription::all());

        let workers = self.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let tracker = TaskTracker::new();
        let mut admitted = 0_u64;

        tracing::info!(
            workers,
            rules = self.engine.enabled_rules(),
            "Risk session started"
        );

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    tracing::info!("Session cancelled, no longer accepting events");
                    break;
                }
                next = source.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    tracing::info!("Event source exhausted");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "Skipping unreadable event");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event source failed");
                    break;
                }
            };

            let state = match self.engine.admit(&event) {
                Ok(state) => state,
                Err(stale) => {
                    tracing::debug!(error = %stale, "Event not evaluated");
                    continue;
                }
            };
            admitted += 1;
            if let Some(observe) = &self.on_admitted {
                observe(&event);
            }

            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    tracing::info!("Session cancelled while waiting for a worker");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                tracing::error!("Worker pool closed");
                break;
            };

            let engine = Arc::clone(&self.engine);
            tracker.spawn(async move {
                let _permit = permit;
                let breaches = engine.evaluate_admitted(&event, &state).await;
                if !breaches.is_empty() {
                    tracing::debug!(
                        contract_id = %event.contract_id(),
                        sequence = event.sequence(),
                        breaches = breaches.len(),
                        "Event evaluated with breaches"
                    );
                }
            });
        }

        tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = tracker.len(),
                grace_ms = u64::try_from(self.config.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                "Grace period elapsed with events still in flight"
            );
        }

        self.tracer.fail_running(SESSION_TIMEOUT_REASON);

        let report = ReportGenerator::generate(&self.tracer, &self.engine);
        tracing::info!(
            admitted,
            flows_completed = report.statistics.flows_completed,
            flows_failed = report.statistics.flows_failed,
            "Risk session finished"
        );
        report
    }
}
