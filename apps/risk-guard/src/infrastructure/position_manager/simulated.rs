//! In-memory position manager for replays and tests.
//!
//! Keeps the latest size and unrealized P&L per contract, fed from the event
//! stream with [`SimulatedPositionManager::observe`]. A close zeroes the size
//! and realizes the unrealized P&L. Latency and failures can be injected.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{
    ClosePositionRequest, ClosePositionResponse, PositionManagerError, PositionManagerPort,
};
use crate::domain::event::{ContractId, EventKind, TradingEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SimulatedPosition {
    size: i64,
    unrealized_pnl: Decimal,
}

/// Simulated broker-side position store.
#[derive(Debug, Default)]
pub struct SimulatedPositionManager {
    positions: Mutex<HashMap<ContractId, SimulatedPosition>>,
    latency: Duration,
    failures: Mutex<VecDeque<PositionManagerError>>,
    closes: Mutex<Vec<ClosePositionRequest>>,
}

impl SimulatedPositionManager {
    /// Empty manager with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every close by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed a position.
    pub fn set_position(&self, contract_id: ContractId, size: i64, unrealized_pnl: Decimal) {
        self.positions.lock().insert(
            contract_id,
            SimulatedPosition {
                size,
                unrealized_pnl,
            },
        );
    }

    /// Track the position carried by an event.
    pub fn observe(&self, event: &TradingEvent) {
        let mut positions = self.positions.lock();
        if event.kind() == EventKind::PositionClosed {
            positions.remove(event.contract_id());
            return;
        }

        let entry = positions.entry(event.contract_id().clone()).or_default();
        if let Some(size) = event.size() {
            entry.size = size;
        }
        if let Some(pnl) = event.unrealized_pnl().and_then(|p| Decimal::try_from(p).ok()) {
            entry.unrealized_pnl = pnl;
        }
    }

    /// Fail the next close with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: PositionManagerError) {
        self.failures.lock().push_back(error);
    }

    /// Current size of a contract, if known.
    #[must_use]
    pub fn position(&self, contract_id: &ContractId) -> Option<i64> {
        self.positions.lock().get(contract_id).map(|p| p.size)
    }

    /// Every close request received, in arrival order.
    #[must_use]
    pub fn closes(&self) -> Vec<ClosePositionRequest> {
        self.closes.lock().clone()
    }
}

#[async_trait]
impl PositionManagerPort for SimulatedPositionManager {
    async fn close_position_direct(
        &self,
        request: ClosePositionRequest,
    ) -> Result<ClosePositionResponse, PositionManagerError> {
        self.closes.lock().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let mut positions = self.positions.lock();
        let position = positions
            .get_mut(&request.contract_id)
            .map(std::mem::take)
            .or_else(|| {
                (request.expected_size != 0).then_some(SimulatedPosition {
                    size: request.expected_size,
                    unrealized_pnl: Decimal::ZERO,
                })
            })
            .filter(|p| p.size != 0);
        drop(positions);

        let Some(position) = position else {
            return Err(PositionManagerError::PositionNotFound {
                contract_id: request.contract_id,
            });
        };

        tracing::info!(
            contract_id = %request.contract_id,
            closed_size = position.size,
            pnl_realized = %position.unrealized_pnl,
            "Simulated close"
        );
        Ok(ClosePositionResponse::flattened(position.unrealized_pnl))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::event::{AccountId, to_payload};

    fn request(contract: &str) -> ClosePositionRequest {
        ClosePositionRequest::new(ContractId::new(contract), AccountId::new("ACC"), "breach")
    }

    fn event(kind: EventKind, payload: serde_json::Value) -> TradingEvent {
        TradingEvent::new(kind, "X", "ACC", to_payload(payload), 1)
    }

    #[tokio::test]
    async fn close_zeroes_position_and_realizes_pnl() {
        let manager = SimulatedPositionManager::new();
        manager.observe(&event(
            EventKind::PositionUpdated,
            json!({ "size": 5, "unrealized_pnl": 12.5 }),
        ));

        let response = manager.close_position_direct(request("X")).await.unwrap();

        assert!(response.success);
        assert_eq!(response.final_size, 0);
        assert_eq!(response.pnl_realized, Decimal::new(125, 1));
        assert_eq!(manager.position(&ContractId::new("X")), Some(0));
        assert_eq!(manager.closes().len(), 1);
    }

    #[tokio::test]
    async fn unknown_flat_contract_is_not_found() {
        let manager = SimulatedPositionManager::new();
        let err = manager.close_position_direct(request("Y")).await.unwrap_err();
        assert!(matches!(err, PositionManagerError::PositionNotFound { .. }));
    }

    #[tokio::test]
    async fn expected_size_stands_in_for_unseen_position() {
        let manager = SimulatedPositionManager::new();
        let response = manager
            .close_position_direct(request("Y").with_expected_size(3))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.pnl_realized, Decimal::ZERO);
    }

    #[tokio::test]
    async fn injected_failures_are_used_once() {
        let manager = SimulatedPositionManager::new();
        manager.set_position(ContractId::new("X"), 4, Decimal::ZERO);
        manager.fail_next(PositionManagerError::RateLimited);

        let first = manager.close_position_direct(request("X")).await;
        let second = manager.close_position_direct(request("X")).await;

        assert_eq!(first.unwrap_err(), PositionManagerError::RateLimited);
        assert!(second.unwrap().success);
    }

    #[test]
    fn closed_event_forgets_position() {
        let manager = SimulatedPositionManager::new();
        manager.observe(&event(EventKind::PositionUpdated, json!({ "size": 2 })));
        manager.observe(&event(EventKind::PositionClosed, json!({})));
        assert_eq!(manager.position(&ContractId::new("X")), None);
    }
}
