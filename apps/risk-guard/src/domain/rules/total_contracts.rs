//! Max gross contracts per account.

use crate::domain::event::TradingEvent;
use crate::domain::position::PositionState;

use super::{BreachDecision, Rule, RuleConfig, RuleEvaluationError};

/// Breaches when the account's gross open size across all contracts exceeds
/// `max_size`.
#[derive(Debug, Clone)]
pub struct MaxTotalContractsRule {
    config: RuleConfig,
}

impl MaxTotalContractsRule {
    /// Config id of this rule.
    pub const ID: &'static str = "max_total_contracts";

    /// Create the rule from its config.
    #[must_use]
    pub const fn new(config: RuleConfig) -> Self {
        Self { config }
    }
}

impl Rule for MaxTotalContractsRule {
    fn config(&self) -> &RuleConfig {
        &self.config
    }

    fn check(
        &self,
        event: &TradingEvent,
        state: &PositionState,
    ) -> Result<Option<BreachDecision>, RuleEvaluationError> {
        // A flat contract has nothing to flatten.
        if state.contract_size == 0 {
            return Ok(None);
        }

        let gross = state.account_gross_size;
        if gross.unsigned_abs() > self.config.max_size.unsigned_abs() {
            return Ok(Some(BreachDecision::from_config(&self.config, event, gross)));
        }
        Ok(None)
    }
}
