//! Port Interfaces
//!
//! Contracts between the risk pipeline and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PositionManagerPort`: closes positions at the broker
//! - `HookListener`: receives lifecycle hook invocations
//!
//! ## Driver Ports (Inbound)
//!
//! - `EventSourcePort`: delivers trading events into the session

mod event_source_port;
mod hook_listener_port;
mod position_manager_port;

pub use event_source_port::{EventSourceError, EventSourcePort, Subscription};
pub use hook_listener_port::{HookError, HookListener, HookName};
#[cfg(test)]
pub use position_manager_port::MockPositionManagerPort;
pub use position_manager_port::{
    ClosePositionRequest, ClosePositionResponse, PositionManagerError, PositionManagerPort,
};
