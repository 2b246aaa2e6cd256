//! Event Source Adapters
//!
//! Implementations of [`EventSourcePort`](crate::application::ports::EventSourcePort):
//! an in-process channel for embedding and tests, and a JSON-lines reader for
//! replaying recorded feeds from a file or stdin. Both assign per-contract
//! sequence numbers when the producer does not.

mod channel;
mod json_lines;
mod sequence;

pub use channel::{ChannelEventSource, EventPublisher, PublishError, event_channel};
pub use json_lines::JsonLinesEventSource;
pub use sequence::SequenceAssigner;
