//! Hook Dispatcher
//!
//! Fans a named lifecycle signal out to every listener registered for it.
//! Listeners run concurrently as separate tasks with no ordering between
//! them; a failing, panicking, or slow listener becomes a failed outcome and
//! never affects its siblings or the caller. [`HookDispatcher::dispatch`]
//! returns only once every listener has finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::json;

use crate::application::ports::{HookError, HookListener, HookName};
use crate::domain::event::{Payload, to_payload};
use crate::infrastructure::metrics;

/// Default per-listener timeout.
pub const DEFAULT_LISTENER_TIMEOUT: Duration = Duration::from_secs(2);

/// Hook name to listener set. Built once at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct HookRegistry {
    listeners: HashMap<HookName, Vec<Arc<dyn HookListener>>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(hook, listeners)| (hook.as_str(), listeners.len()))
            .collect();
        f.debug_struct("HookRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl HookRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `hook`. Registering the same handle twice is a no-op.
    #[must_use]
    pub fn register(mut self, hook: HookName, listener: Arc<dyn HookListener>) -> Self {
        let set = self.listeners.entry(hook).or_default();
        if !set.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            set.push(listener);
        }
        self
    }

    /// Register `listener` for each hook in `hooks`.
    #[must_use]
    pub fn register_all(
        self,
        hooks: impl IntoIterator<Item = HookName>,
        listener: &Arc<dyn HookListener>,
    ) -> Self {
        hooks
            .into_iter()
            .fold(self, |registry, hook| registry.register(hook, Arc::clone(listener)))
    }

    /// Listeners for `hook`.
    #[must_use]
    pub fn listeners(&self, hook: &HookName) -> &[Arc<dyn HookListener>] {
        self.listeners.get(hook).map_or(&[], Vec::as_slice)
    }

    /// Total registered listener handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

/// Result of one listener invocation.
#[derive(Debug, Clone)]
pub struct ListenerOutcome {
    /// Listener name.
    pub listener: String,
    /// What the listener returned.
    pub result: Result<(), HookError>,
    /// Time the listener took.
    pub elapsed: Duration,
}

impl ListenerOutcome {
    /// Whether the listener succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// All listener outcomes of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Hook that was dispatched.
    pub hook: HookName,
    /// One outcome per listener, in no particular order.
    pub outcomes: Vec<ListenerOutcome>,
}

impl DispatchReport {
    /// Listener invocations that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Listener invocations that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Errors of failed listeners.
    pub fn errors(&self) -> impl Iterator<Item = &HookError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// Step data for a `HOOK_EXEC` trace entry.
    #[must_use]
    pub fn to_step_data(&self) -> Payload {
        let errors: Vec<String> = self.errors().map(ToString::to_string).collect();
        to_payload(json!({
            "hook": self.hook,
            "listeners": self.outcomes.len(),
            "succeeded": self.succeeded(),
            "failed": self.failed(),
            "errors": errors,
        }))
    }
}

/// Concurrent hook dispatcher.
#[derive(Debug, Clone)]
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
    listener_timeout: Duration,
}

impl HookDispatcher {
    /// Create a dispatcher over a frozen registry.
    #[must_use]
    pub const fn new(registry: Arc<HookRegistry>, listener_timeout: Duration) -> Self {
        Self {
            registry,
            listener_timeout,
        }
    }

    /// Registry being dispatched from.
    #[must_use]
    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Invoke every listener of `hook` with `payload` and wait for all of them.
    pub async fn dispatch(&self, hook: &HookName, payload: Payload) -> DispatchReport {
        let listeners = self.registry.listeners(hook);
        if listeners.is_empty() {
            tracing::trace!(hook = %hook, "No listeners registered");
            return DispatchReport {
                hook: hook.clone(),
                outcomes: Vec::new(),
            };
        }

        let payload = Arc::new(payload);
        let invocations = listeners
            .iter()
            .map(|listener| self.invoke(hook, Arc::clone(listener), Arc::clone(&payload)));
        let outcomes = join_all(invocations).await;

        let report = DispatchReport {
            hook: hook.clone(),
            outcomes,
        };
        for outcome in &report.outcomes {
            if let Err(e) = &outcome.result {
                tracing::warn!(hook = %hook, listener = %outcome.listener, error = %e, "Hook listener failed");
            }
        }
        tracing::debug!(
            hook = %hook,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Hook dispatched"
        );
        metrics::record_hook_dispatch(
            hook.as_str(),
            report.succeeded() as u64,
            report.failed() as u64,
        );
        report
    }

    async fn invoke(
        &self,
        hook: &HookName,
        listener: Arc<dyn HookListener>,
        payload: Arc<Payload>,
    ) -> ListenerOutcome {
        let name = listener.name().to_string();
        let hook = hook.clone();
        let timeout = self.listener_timeout;
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, listener.on_hook(&hook, &payload)).await {
                Ok(result) => result,
                Err(_) => Err(HookError::Timeout {
                    listener: task_name,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            (result, started.elapsed())
        });

        match handle.await {
            Ok((result, elapsed)) => ListenerOutcome {
                listener: name,
                result,
                elapsed,
            },
            Err(e) => ListenerOutcome {
                listener: name.clone(),
                result: Err(HookError::Aborted {
                    listener: name,
                    message: e.to_string(),
                }),
                elapsed: Duration::ZERO,
            },
        }
    }
}
