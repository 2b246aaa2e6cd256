//! Auto-Flatten Executor
//!
//! Closes a breaching position through the position manager, bracketed by
//! the `auto_flatten_start` and `auto_flatten_complete` hooks. At most one
//! flatten runs per contract; the in-flight claim is released on every exit
//! path, including cancellation of the calling future.
//!
//! A failed close is reported in the [`FlattenResult`], never raised.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use super::flow_tracer::FlowTracer;
use super::hook_dispatcher::HookDispatcher;
use crate::application::ports::{ClosePositionRequest, HookName, PositionManagerPort};
use crate::domain::event::{AccountId, ContractId, to_payload};
use crate::domain::flow::{FlowId, Stage};
use crate::infrastructure::metrics::{self, FlattenOutcome};

/// Position manager method name recorded in traces.
pub const CLOSE_POSITION_METHOD: &str = "close_position_direct";

/// Default bound on a single position manager call.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a flatten did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlattenError {
    /// A flatten for the contract is already running.
    #[error("flatten already in flight for contract {contract_id}")]
    DuplicateInFlight {
        /// Contract being flattened.
        contract_id: ContractId,
    },

    /// The position manager call failed, timed out, or reported failure.
    #[error("close position failed: {message}")]
    ApiCallFailure {
        /// Failure detail.
        message: String,
        /// Whether the call exceeded its timeout.
        timed_out: bool,
    },
}

/// A flatten request derived from a breach decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenRequest {
    /// Contract to close.
    pub contract_id: ContractId,
    /// Owning account.
    pub account_id: AccountId,
    /// Close reason forwarded to the position manager.
    pub reason: String,
    /// Size at the time of the breach.
    pub current_size: i64,
}

/// Outcome of one flatten attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenResult {
    /// Whether the position was closed.
    pub success: bool,
    /// Size after the attempt; unchanged when the close did not happen.
    pub final_size: i64,
    /// Realized P&L reported by the position manager.
    pub pnl_realized: Option<Decimal>,
    /// Failure, if any.
    pub error: Option<FlattenError>,
}

impl FlattenResult {
    fn failed(current_size: i64, error: FlattenError) -> Self {
        Self {
            success: false,
            final_size: current_size,
            pnl_realized: None,
            error: Some(error),
        }
    }

    /// Whether the attempt was rejected as a duplicate.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self.error, Some(FlattenError::DuplicateInFlight { .. }))
    }
}

/// Contracts currently being flattened.
#[derive(Debug, Default)]
pub struct InFlightFlatten {
    contracts: Mutex<HashSet<ContractId>>,
}

impl InFlightFlatten {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `contract`. Returns `None` if it is already claimed.
    pub fn try_acquire(&self, contract: &ContractId) -> Option<InFlightGuard<'_>> {
        let mut contracts = self.contracts.lock();
        if !contracts.insert(contract.clone()) {
            return None;
        }
        metrics::set_flatten_in_flight(contracts.len());
        drop(contracts);

        Some(InFlightGuard {
            set: self,
            contract: contract.clone(),
        })
    }

    /// Whether `contract` is claimed.
    #[must_use]
    pub fn contains(&self, contract: &ContractId) -> bool {
        self.contracts.lock().contains(contract)
    }

    /// Number of claimed contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.lock().len()
    }

    /// Whether nothing is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, contract: &ContractId) {
        let mut contracts = self.contracts.lock();
        contracts.remove(contract);
        metrics::set_flatten_in_flight(contracts.len());
    }
}

/// Claim on a contract; releases it when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    set: &'a InFlightFlatten,
    contract: ContractId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.release(&self.contract);
    }
}

/// Executes auto-flatten remediation.
pub struct AutoFlattenExecutor {
    position_manager: Arc<dyn PositionManagerPort>,
    dispatcher: HookDispatcher,
    tracer: Arc<FlowTracer>,
    in_flight: InFlightFlatten,
    api_timeout: Duration,
}

impl std::fmt::Debug for AutoFlattenExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoFlattenExecutor")
            .field("in_flight", &self.in_flight)
            .field("api_timeout", &self.api_timeout)
            .finish_non_exhaustive()
    }
}

impl AutoFlattenExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(
        position_manager: Arc<dyn PositionManagerPort>,
        dispatcher: HookDispatcher,
        tracer: Arc<FlowTracer>,
        api_timeout: Duration,
    ) -> Self {
        Self {
            position_manager,
            dispatcher,
            tracer,
            in_flight: InFlightFlatten::new(),
            api_timeout,
        }
    }

    /// Contracts currently being flattened.
    #[must_use]
    pub const fn in_flight(&self) -> &InFlightFlatten {
        &self.in_flight
    }

    /// Flatten `request.contract_id`, recording every stage on `flow_id`.
    pub async fn flatten(&self, flow_id: FlowId, request: FlattenRequest) -> FlattenResult {
        let Some(_claim) = self.in_flight.try_acquire(&request.contract_id) else {
            tracing::warn!(
                flow_id = %flow_id,
                contract_id = %request.contract_id,
                "Flatten skipped, already in flight"
            );
            self.tracer.note(
                flow_id,
                Stage::EvalDetail,
                to_payload(json!({
                    "action": "flatten_skipped",
                    "reason": "duplicate_in_flight",
                    "contractId": request.contract_id,
                })),
            );
            metrics::record_flatten(FlattenOutcome::Duplicate);
            return FlattenResult::failed(
                request.current_size,
                FlattenError::DuplicateInFlight {
                    contract_id: request.contract_id,
                },
            );
        };

        tracing::info!(
            flow_id = %flow_id,
            contract_id = %request.contract_id,
            account_id = %request.account_id,
            size = request.current_size,
            "Auto-flatten started"
        );

        let start = self
            .dispatcher
            .dispatch(
                &HookName::AUTO_FLATTEN_START,
                to_payload(json!({
                    "contractId": request.contract_id,
                    "action": "closing_position",
                })),
            )
            .await;
        self.tracer.note(flow_id, Stage::HookExec, start.to_step_data());

        let result = self.close(flow_id, &request).await;

        let complete = self
            .dispatcher
            .dispatch(
                &HookName::AUTO_FLATTEN_COMPLETE,
                to_payload(json!({
                    "contractId": request.contract_id,
                    "status": if result.success { "success" } else { "failed" },
                    "error": result.error.as_ref().map(ToString::to_string),
                })),
            )
            .await;
        self.tracer
            .note(flow_id, Stage::HookExec, complete.to_step_data());

        if result.success {
            metrics::record_flatten(FlattenOutcome::Success);
            tracing::info!(
                flow_id = %flow_id,
                contract_id = %request.contract_id,
                final_size = result.final_size,
                "Auto-flatten completed"
            );
        } else {
            metrics::record_flatten(FlattenOutcome::Failed);
            tracing::error!(
                flow_id = %flow_id,
                contract_id = %request.contract_id,
                error = ?result.error,
                "Auto-flatten failed"
            );
        }
        result
    }

    async fn close(&self, flow_id: FlowId, request: &FlattenRequest) -> FlattenResult {
        let call = ClosePositionRequest::new(
            request.contract_id.clone(),
            request.account_id.clone(),
            request.reason.clone(),
        )
        .with_expected_size(request.current_size);

        let started = Instant::now();
        let response =
            tokio::time::timeout(self.api_timeout, self.position_manager.close_position_direct(call))
                .await;
        let latency = started.elapsed();
        metrics::record_close_latency(latency);

        let result = match response {
            Ok(Ok(response)) if response.success => FlattenResult {
                success: true,
                final_size: response.final_size,
                pnl_realized: Some(response.pnl_realized),
                error: None,
            },
            Ok(Ok(response)) => FlattenResult {
                success: false,
                final_size: response.final_size,
                pnl_realized: None,
                error: Some(FlattenError::ApiCallFailure {
                    message: format!(
                        "position manager reported failure, final size {}",
                        response.final_size
                    ),
                    timed_out: false,
                }),
            },
            Ok(Err(e)) => FlattenResult::failed(
                request.current_size,
                FlattenError::ApiCallFailure {
                    message: e.to_string(),
                    timed_out: false,
                },
            ),
            Err(_) => FlattenResult::failed(
                request.current_size,
                FlattenError::ApiCallFailure {
                    message: format!("timed out after {}ms", self.api_timeout.as_millis()),
                    timed_out: true,
                },
            ),
        };

        self.tracer.note(
            flow_id,
            Stage::ApiCall,
            to_payload(json!({
                "method": CLOSE_POSITION_METHOD,
                "contractId": request.contract_id,
                "accountId": request.account_id,
                "success": result.success,
                "finalSize": result.final_size,
                "pnlRealized": result.pnl_realized,
                "latencyMs": u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                "error": result.error.as_ref().map(ToString::to_string),
            })),
        );
        result
    }
}
