//! Dry-run position manager.
//!
//! Logs the close that would have been sent and reports success with the
//! position untouched.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::application::ports::{
    ClosePositionRequest, ClosePositionResponse, PositionManagerError, PositionManagerPort,
};

/// Position manager that never acts.
#[derive(Debug, Default)]
pub struct DryRunPositionManager {
    intended: AtomicU64,
}

impl DryRunPositionManager {
    /// Create a dry-run manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes that would have been sent.
    #[must_use]
    pub fn intended_closes(&self) -> u64 {
        self.intended.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PositionManagerPort for DryRunPositionManager {
    async fn close_position_direct(
        &self,
        request: ClosePositionRequest,
    ) -> Result<ClosePositionResponse, PositionManagerError> {
        self.intended.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            contract_id = %request.contract_id,
            account_id = %request.account_id,
            size = request.expected_size,
            reason = %request.reason,
            "Dry run: position close not sent"
        );
        Ok(ClosePositionResponse {
            success: true,
            final_size: request.expected_size,
            pnl_realized: Decimal::ZERO,
        })
    }
}
