//! In-process event channel.
//!
//! [`EventPublisher`] handles push events into a bounded `mpsc` channel;
//! [`ChannelEventSource`] drains it for the session. The source is exhausted
//! once every publisher is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use super::sequence::SequenceAssigner;
use crate::application::ports::{EventSourceError, EventSourcePort, Subscription};
use crate::domain::event::{AccountId, ContractId, EventKind, Payload, TradingEvent};

/// Publishing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The receiving source was dropped.
    #[error("event channel closed")]
    Closed,
}

/// Create a bounded channel of `capacity` events.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventPublisher, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let publisher = EventPublisher {
        tx,
        sequences: Arc::new(Mutex::new(SequenceAssigner::new())),
    };
    let source = ChannelEventSource {
        rx,
        subscription: Subscription::all(),
    };
    (publisher, source)
}

/// Cloneable handle that stamps and sends events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<TradingEvent>,
    sequences: Arc<Mutex<SequenceAssigner>>,
}

impl EventPublisher {
    /// Publish an event, assigning the next sequence for its contract.
    /// Returns the assigned sequence.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Closed`] if the source was dropped.
    pub async fn publish(
        &self,
        kind: EventKind,
        contract_id: impl Into<ContractId>,
        account_id: impl Into<AccountId>,
        payload: Payload,
    ) -> Result<u64, PublishError> {
        let contract_id = contract_id.into();
        let sequence = self.sequences.lock().assign(&contract_id, None);
        let event = TradingEvent::new(kind, contract_id, account_id, payload, sequence);
        self.send(event).await?;
        Ok(sequence)
    }

    /// Publish an already sequenced event as is.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Closed`] if the source was dropped.
    pub async fn send(&self, event: TradingEvent) -> Result<(), PublishError> {
        self.sequences
            .lock()
            .assign(event.contract_id(), Some(event.sequence()));
        self.tx.send(event).await.map_err(|_| PublishError::Closed)
    }
}

/// Receiving end of [`event_channel`].
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<TradingEvent>,
    subscription: Subscription,
}

#[async_trait]
impl EventSourcePort for ChannelEventSource {
    fn subscribe(&mut self, subscription: Subscription) {
        self.subscription = subscription;
    }

    async fn next_event(&mut self) -> Result<Option<TradingEvent>, EventSourceError> {
        while let Some(event) = self.rx.recv().await {
            if self.subscription.accepts(event.kind()) {
                return Ok(Some(event));
            }
            tracing::trace!(kind = %event.kind(), "Dropping unsubscribed event");
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assigns_sequences_per_contract() {
        let (publisher, mut source) = event_channel(8);

        publisher
            .publish(EventKind::PositionUpdated, "A", "ACC", Payload::new())
            .await
            .unwrap();
        publisher
            .publish(EventKind::PositionUpdated, "B", "ACC", Payload::new())
            .await
            .unwrap();
        let third = publisher
            .publish(EventKind::OrderFilled, "A", "ACC", Payload::new())
            .await
            .unwrap();
        drop(publisher);

        assert_eq!(third, 2);
        let mut seen = Vec::new();
        while let Some(event) = source.next_event().await.unwrap() {
            seen.push((event.contract_id().to_string(), event.sequence()));
        }
        assert_eq!(
            seen,
            vec![("A".to_string(), 1), ("B".to_string(), 1), ("A".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn unsubscribed_kinds_are_dropped() {
        let (publisher, mut source) = event_channel(8);
        source.subscribe(Subscription::default().on(EventKind::OrderFilled));

        publisher
            .publish(EventKind::PositionPnlUpdate, "A", "ACC", Payload::new())
            .await
            .unwrap();
        publisher
            .publish(EventKind::OrderFilled, "A", "ACC", Payload::new())
            .await
            .unwrap();
        drop(publisher);

        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::OrderFilled);
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_fails_once_source_is_gone() {
        let (publisher, source) = event_channel(1);
        drop(source);
        let err = publisher
            .publish(EventKind::PositionUpdated, "A", "ACC", Payload::new())
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::Closed);
    }
}
