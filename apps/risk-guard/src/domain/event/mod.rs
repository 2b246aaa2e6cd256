//! Trading Events
//!
//! Immutable events delivered by the event source boundary. Each event is
//! stamped with a per-contract sequence number used for staleness checks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form key/value data carried by events, steps, and hook payloads.
pub type Payload = serde_json::Map<String, Value>;

/// Convert a JSON value into a [`Payload`]. Non-object values yield an empty map.
#[must_use]
pub fn to_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Macro to define a string-backed identifier newtype.
macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_id!(ContractId, "Broker contract identifier (e.g. `CON.F.US.MNQ.U25`).");
define_id!(AccountId, "Broker account identifier.");

/// Kind of trading event emitted by the broker feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Position size or price changed.
    #[serde(alias = "position_updated")]
    PositionUpdated,
    /// An order was filled.
    #[serde(alias = "order_filled")]
    OrderFilled,
    /// Unrealized P&L moved; carries no size change.
    #[serde(alias = "position_pnl_update")]
    PositionPnlUpdate,
    /// Position was closed at the broker.
    #[serde(alias = "position_closed")]
    PositionClosed,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PositionUpdated => "POSITION_UPDATED",
            Self::OrderFilled => "ORDER_FILLED",
            Self::PositionPnlUpdate => "POSITION_PNL_UPDATE",
            Self::PositionClosed => "POSITION_CLOSED",
        }
    }

    /// Whether risk rules are evaluated for this kind.
    ///
    /// P&L ticks only refresh the position book.
    #[must_use]
    pub const fn is_evaluated(self) -> bool {
        !matches!(self, Self::PositionPnlUpdate)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trading event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingEvent {
    kind: EventKind,
    contract_id: ContractId,
    account_id: AccountId,
    payload: Payload,
    received_at: DateTime<Utc>,
    sequence: u64,
}

impl TradingEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(
        kind: EventKind,
        contract_id: impl Into<ContractId>,
        account_id: impl Into<AccountId>,
        payload: Payload,
        sequence: u64,
    ) -> Self {
        Self {
            kind,
            contract_id: contract_id.into(),
            account_id: account_id.into(),
            payload,
            received_at: Utc::now(),
            sequence,
        }
    }

    /// Override the receive timestamp (replayed events keep their original time).
    #[must_use]
    pub const fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Contract the event refers to.
    #[must_use]
    pub const fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    /// Account the event refers to.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Raw event payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Time the event crossed the source boundary.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Per-contract sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Signed position size carried by the event.
    ///
    /// Looks at `size`, then `position.size`, then `current_position.size`.
    #[must_use]
    pub fn size(&self) -> Option<i64> {
        if let Some(size) = self.payload.get("size") {
            return size.as_i64();
        }
        ["position", "current_position"]
            .iter()
            .filter_map(|key| self.payload.get(*key))
            .find_map(|nested| nested.get("size"))
            .and_then(Value::as_i64)
    }

    /// Unrealized P&L carried by the event, if any.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Option<f64> {
        self.payload
            .get("unrealized_pnl")
            .or_else(|| self.payload.get("pnl"))
            .and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn size_reads_top_level_field() {
        let event = TradingEvent::new(
            EventKind::PositionUpdated,
            "X",
            "ACC",
            payload(json!({"size": -4})),
            1,
        );
        assert_eq!(event.size(), Some(-4));
    }

    #[test]
    fn size_falls_back_to_nested_position() {
        let event = TradingEvent::new(
            EventKind::OrderFilled,
            "X",
            "ACC",
            payload(json!({"current_position": {"size": 3}})),
            1,
        );
        assert_eq!(event.size(), Some(3));
    }

    #[test]
    fn size_missing_or_non_integer_is_none() {
        let missing = TradingEvent::new(EventKind::PositionUpdated, "X", "ACC", Payload::new(), 1);
        assert_eq!(missing.size(), None);

        let fractional = TradingEvent::new(
            EventKind::PositionUpdated,
            "X",
            "ACC",
            payload(json!({"size": 1.5})),
            1,
        );
        assert_eq!(fractional.size(), None);
    }

    #[test]
    fn pnl_updates_are_not_evaluated() {
        assert!(EventKind::PositionUpdated.is_evaluated());
        assert!(EventKind::OrderFilled.is_evaluated());
        assert!(EventKind::PositionClosed.is_evaluated());
        assert!(!EventKind::PositionPnlUpdate.is_evaluated());
    }

    #[test]
    fn event_kind_wire_names() {
        let kind: EventKind = serde_json::from_str("\"POSITION_PNL_UPDATE\"").unwrap();
        assert_eq!(kind, EventKind::PositionPnlUpdate);
        assert_eq!(EventKind::OrderFilled.to_string(), "ORDER_FILLED");
    }
}
