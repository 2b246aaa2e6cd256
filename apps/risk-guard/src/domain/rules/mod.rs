//! Risk Rules
//!
//! A rule is a pure evaluator: given an event and the position snapshot it
//! either reports a [`BreachDecision`] or nothing. New rules are added by
//! implementing [`Rule`] and registering a constructor in [`build_rule`].

mod max_contracts;
mod total_contracts;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::{AccountId, ContractId, TradingEvent};
use super::position::PositionState;

pub use max_contracts::MaxContractsRule;
pub use total_contracts::MaxTotalContractsRule;

/// Identifier of a configured rule (e.g. `max_contracts`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Create a rule id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Breach severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Logged as a warning.
    #[default]
    Medium,
    /// Logged as an error.
    High,
}

impl Severity {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Static configuration of one rule. Immutable during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule identifier, taken from the config map key.
    #[serde(skip_deserializing, default = "RuleConfig::unnamed")]
    pub rule_id: RuleId,
    /// Whether the rule participates in evaluation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Largest permitted absolute size.
    pub max_size: i64,
    /// Severity attached to breaches.
    #[serde(default)]
    pub severity: Severity,
    /// Whether breaches trigger an automatic flatten.
    #[serde(default)]
    pub auto_flatten: bool,
}

const fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    /// Create an enabled rule config.
    #[must_use]
    pub fn new(rule_id: impl Into<String>, max_size: i64) -> Self {
        Self {
            rule_id: RuleId::new(rule_id),
            enabled: true,
            max_size,
            severity: Severity::Medium,
            auto_flatten: false,
        }
    }

    /// Set the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Enable or disable auto-flatten.
    #[must_use]
    pub const fn with_auto_flatten(mut self, auto_flatten: bool) -> Self {
        self.auto_flatten = auto_flatten;
        self
    }

    /// Enable or disable the rule.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn unnamed() -> RuleId {
        RuleId::new("")
    }
}

/// A rule's determination that a position exceeds its limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachDecision {
    /// Rule that produced the decision.
    pub rule_id: RuleId,
    /// Breaching contract.
    pub contract_id: ContractId,
    /// Owning account.
    pub account_id: AccountId,
    /// Measured size (sign preserved).
    pub current_size: i64,
    /// Configured limit.
    pub limit: i64,
    /// Severity from config.
    pub severity: Severity,
    /// Whether remediation is requested.
    pub auto_flatten: bool,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

impl BreachDecision {
    /// Build a decision for `event` from the rule's config.
    #[must_use]
    pub fn from_config(config: &RuleConfig, event: &TradingEvent, current_size: i64) -> Self {
        Self {
            rule_id: config.rule_id.clone(),
            contract_id: event.contract_id().clone(),
            account_id: event.account_id().clone(),
            current_size,
            limit: config.max_size,
            severity: config.severity,
            auto_flatten: config.auto_flatten,
            detected_at: Utc::now(),
        }
    }

    /// Whether the measured magnitude strictly exceeds the limit.
    #[must_use]
    pub const fn exceeds_limit(&self) -> bool {
        self.current_size.unsigned_abs() > self.limit.unsigned_abs()
    }

    /// Human-readable reason passed to the position manager.
    #[must_use]
    pub fn reason(&self) -> String {
        format!(
            "{} breach: size {} exceeds limit {}",
            self.rule_id, self.current_size, self.limit
        )
    }
}

/// Failure of a single rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleEvaluationError {
    /// Rule-specific failure.
    #[error("rule '{rule_id}' failed: {message}")]
    Failed {
        /// Rule that failed.
        rule_id: RuleId,
        /// Failure detail.
        message: String,
    },
}

/// A position risk rule.
pub trait Rule: Send + Sync {
    /// Configuration the rule was built from.
    fn config(&self) -> &RuleConfig;

    /// Evaluate `event` against the post-event position snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RuleEvaluationError`] when the event cannot be evaluated.
    fn check(
        &self,
        event: &TradingEvent,
        state: &PositionState,
    ) -> Result<Option<BreachDecision>, RuleEvaluationError>;

    /// Rule identifier.
    fn id(&self) -> &RuleId {
        &self.config().rule_id
    }
}

/// Rule ids understood by [`build_rule`].
pub const KNOWN_RULES: &[&str] = &[MaxContractsRule::ID, MaxTotalContractsRule::ID];

/// Construct the rule implementation for a config entry.
///
/// Returns `None` for an unknown rule id.
#[must_use]
pub fn build_rule(config: RuleConfig) -> Option<Box<dyn Rule>> {
    match config.rule_id.as_str() {
        MaxContractsRule::ID => Some(Box::new(MaxContractsRule::new(config))),
        MaxTotalContractsRule::ID => Some(Box::new(MaxTotalContractsRule::new(config))),
        _ => None,
    }
}
