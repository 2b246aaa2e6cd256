//! Position Book
//!
//! Latest known position size per (account, contract), refreshed from events
//! before rules are evaluated. Rules receive an immutable [`PositionState`]
//! snapshot so they stay pure.

use std::collections::HashMap;

use serde::Serialize;

use super::event::{AccountId, ContractId, EventKind, TradingEvent};

/// Position snapshot handed to every rule for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PositionState {
    /// Signed size of the event's contract after applying the event.
    pub contract_size: i64,
    /// Sum of absolute sizes across the account's contracts.
    pub account_gross_size: i64,
    /// Number of non-flat contracts held by the account.
    pub open_contracts: usize,
}

/// Last known sizes keyed by account, then contract.
#[derive(Debug, Default)]
pub struct PositionBook {
    accounts: HashMap<AccountId, HashMap<ContractId, i64>>,
}

impl PositionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event and return the resulting snapshot for its account.
    ///
    /// `POSITION_CLOSED` flattens the contract regardless of payload. Events
    /// without a size leave the book unchanged.
    pub fn apply(&mut self, event: &TradingEvent) -> PositionState {
        let contracts = self.accounts.entry(event.account_id().clone()).or_default();

        let new_size = match event.kind() {
            EventKind::PositionClosed => Some(0),
            _ => event.size(),
        };

        if let Some(size) = new_size {
            if size == 0 {
                contracts.remove(event.contract_id());
            } else {
                contracts.insert(event.contract_id().clone(), size);
            }
        }

        Self::snapshot(contracts, event.contract_id())
    }

    /// Current snapshot without applying anything.
    #[must_use]
    pub fn state(&self, account: &AccountId, contract: &ContractId) -> PositionState {
        self.accounts
            .get(account)
            .map(|contracts| Self::snapshot(contracts, contract))
            .unwrap_or_default()
    }

    fn snapshot(contracts: &HashMap<ContractId, i64>, contract: &ContractId) -> PositionState {
        PositionState {
            contract_size: contracts.get(contract).copied().unwrap_or(0),
            account_gross_size: contracts.values().map(|size| size.abs()).sum(),
            open_contracts: contracts.len(),
        }
    }
}
