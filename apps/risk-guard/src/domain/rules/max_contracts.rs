//! Max contracts per position.

use crate::domain::event::TradingEvent;
use crate::domain::position::PositionState;

use super::{BreachDecision, Rule, RuleConfig, RuleEvaluationError};

/// Breaches when the contract's size magnitude exceeds `max_size`.
///
/// The size is read from the post-event snapshot: a close is flat, and an
/// event without a size keeps the last known size.
#[derive(Debug, Clone)]
pub struct MaxContractsRule {
    config: RuleConfig,
}

impl MaxContractsRule {
    /// Config id of this rule.
    pub const ID: &'static str = "max_contracts";

    /// Create the rule from its config.
    #[must_use]
    pub const fn new(config: RuleConfig) -> Self {
        Self { config }
    }
}

impl Rule for MaxContractsRule {
    fn config(&self) -> &RuleConfig {
        &self.config
    }

    fn check(
        &self,
        event: &TradingEvent,
        state: &PositionState,
    ) -> Result<Option<BreachDecision>, RuleEvaluationError> {
        let size = state.contract_size;
        if size.unsigned_abs() > self.config.max_size.unsigned_abs() {
            return Ok(Some(BreachDecision::from_config(&self.config, event, size)));
        }
        Ok(None)
    }
}
