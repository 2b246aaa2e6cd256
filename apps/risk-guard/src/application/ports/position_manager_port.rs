//! Position Manager Port (Driven Port)
//!
//! Interface for closing positions at the broker. Calls are fallible remote
//! operations; the port itself never retries.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::event::{AccountId, ContractId};

/// Request to close a position outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    /// Contract to close.
    pub contract_id: ContractId,
    /// Owning account.
    pub account_id: AccountId,
    /// Why the close was requested.
    pub reason: String,
    /// Size the caller believes is open.
    pub expected_size: i64,
}

impl ClosePositionRequest {
    /// Create a close request.
    #[must_use]
    pub fn new(
        contract_id: ContractId,
        account_id: AccountId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            contract_id,
            account_id,
            reason: reason.into(),
            expected_size: 0,
        }
    }

    /// Attach the size the caller believes is open.
    #[must_use]
    pub const fn with_expected_size(mut self, expected_size: i64) -> Self {
        self.expected_size = expected_size;
        self
    }
}

/// Outcome reported by the position manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionResponse {
    /// Whether the broker accepted the close.
    pub success: bool,
    /// Size remaining after the close.
    pub final_size: i64,
    /// Realized P&L of the close.
    pub pnl_realized: Decimal,
}

impl ClosePositionResponse {
    /// A fully flattened position.
    #[must_use]
    pub const fn flattened(pnl_realized: Decimal) -> Self {
        Self {
            success: true,
            final_size: 0,
            pnl_realized,
        }
    }
}

/// Position manager errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionManagerError {
    /// Transport-level failure talking to the broker.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// The broker rejected the close.
    #[error("Close rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// No open position exists for the contract.
    #[error("No open position for contract {contract_id}")]
    PositionNotFound {
        /// Contract that was looked up.
        contract_id: ContractId,
    },

    /// Rate limited by the broker.
    #[error("Rate limited")]
    RateLimited,
}

impl PositionManagerError {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RateLimited)
    }
}

/// Position manager port.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionManagerPort: Send + Sync {
    /// Close the position for a contract immediately at market.
    async fn close_position_direct(
        &self,
        request: ClosePositionRequest,
    ) -> Result<ClosePositionResponse, PositionManagerError>;
}

#[async_trait]
impl<T: PositionManagerPort + ?Sized> PositionManagerPort for Arc<T> {
    async fn close_position_direct(
        &self,
        request: ClosePositionRequest,
    ) -> Result<ClosePositionResponse, PositionManagerError> {
        (**self).close_position_direct(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(
            PositionManagerError::Connection {
                message: "reset".to_string()
            }
            .is_transient()
        );
        assert!(PositionManagerError::RateLimited.is_transient());
        assert!(
            !PositionManagerError::Rejected {
                reason: "market closed".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = ClosePositionRequest::new(
            ContractId::new("X"),
            AccountId::new("ACC"),
            "limit breach",
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contractId"], "X");
        assert_eq!(json["accountId"], "ACC");
        assert_eq!(json["expectedSize"], 0);
    }
}
