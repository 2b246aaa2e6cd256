//! Event Source Port (Driver Port)
//!
//! The boundary that delivers trading events into the session. Delivery is
//! at-least-once and in order per contract; sources own reconnection.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::event::{EventKind, TradingEvent};

/// Event source errors.
#[derive(Debug, Error)]
pub enum EventSourceError {
    /// Underlying I/O failed.
    #[error("Event source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be decoded.
    #[error("Malformed event at line {line}: {message}")]
    Malformed {
        /// 1-based line or record number.
        line: usize,
        /// Decoder message.
        message: String,
    },
}

impl EventSourceError {
    /// Whether the source can continue after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Set of event kinds a consumer subscribed to.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    kinds: HashSet<EventKind>,
}

impl Subscription {
    /// Subscribe to every kind.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
            .on(EventKind::PositionUpdated)
            .on(EventKind::OrderFilled)
            .on(EventKind::PositionPnlUpdate)
            .on(EventKind::PositionClosed)
    }

    /// Add a kind.
    #[must_use]
    pub fn on(mut self, kind: EventKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Whether events of `kind` are delivered.
    #[must_use]
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Event source port.
#[async_trait]
pub trait EventSourcePort: Send {
    /// Register the kinds to deliver. Other kinds are dropped at the source.
    fn subscribe(&mut self, subscription: Subscription);

    /// Await the next subscribed event. `Ok(None)` means the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError`] when reading or decoding fails.
    async fn next_event(&mut self) -> Result<Option<TradingEvent>, EventSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_filters_kinds() {
        let subscription = Subscription::default().on(EventKind::OrderFilled);
        assert!(subscription.accepts(EventKind::OrderFilled));
        assert!(!subscription.accepts(EventKind::PositionPnlUpdate));
        assert!(Subscription::all().accepts(EventKind::PositionClosed));
    }
}
