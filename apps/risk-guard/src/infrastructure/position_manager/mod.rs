//! Position Manager Adapters
//!
//! Implementations of [`PositionManagerPort`](crate::application::ports::PositionManagerPort):
//!
//! - `SimulatedPositionManager`: in-memory positions for replays and tests
//! - `DryRunPositionManager`: logs intended closes and performs none
//! - `RetryingPositionManager`: retries transient failures of another manager

mod dry_run;
mod retry;
mod simulated;

pub use dry_run::DryRunPositionManager;
pub use retry::{ExponentialBackoffCalculator, RetryPolicy, RetryingPositionManager};
pub use simulated::SimulatedPositionManager;
