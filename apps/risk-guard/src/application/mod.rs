//! Application Layer - Risk pipeline services and port definitions.
//!
//! This layer contains the services that evaluate events, remediate breaches
//! and trace flows, plus the port interfaces they use to reach the outside
//! world.

/// Port interfaces for event sources, position managers and hook listeners.
pub mod ports;

/// Rule engine, auto-flatten, hook dispatch, tracing and reporting.
pub mod services;
