//! Domain Layer - Core risk types and business logic.
//!
//! Events, the position book, rules, and the flow model. Nothing here
//! performs I/O.

/// Trading events and identifiers.
pub mod event;

/// Flow and execution step model for tracing.
pub mod flow;

/// Latest known positions per account.
pub mod position;

/// Rule trait, configuration, and implementations.
pub mod rules;
