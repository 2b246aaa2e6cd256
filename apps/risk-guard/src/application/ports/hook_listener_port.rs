//! Hook Listener Port (Driven Port)
//!
//! Listeners attach to named lifecycle hooks and are invoked by the
//! [`HookDispatcher`](crate::application::services::HookDispatcher).

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::event::Payload;

/// Name of a lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HookName(Cow<'static, str>);

impl HookName {
    /// Fired once per breach, before any remediation.
    pub const ON_BREACH: Self = Self(Cow::Borrowed("on_breach"));
    /// Fired before the position manager is called.
    pub const AUTO_FLATTEN_START: Self = Self(Cow::Borrowed("auto_flatten_start"));
    /// Fired after the position manager call returns or fails.
    pub const AUTO_FLATTEN_COMPLETE: Self = Self(Cow::Borrowed("auto_flatten_complete"));

    /// A custom hook name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Borrow as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure raised by a single listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The listener returned an error.
    #[error("listener '{listener}' failed: {message}")]
    ListenerFailed {
        /// Listener name.
        listener: String,
        /// Error message.
        message: String,
    },

    /// The listener did not finish within the dispatch timeout.
    #[error("listener '{listener}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Listener name.
        listener: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The listener task panicked or was cancelled.
    #[error("listener '{listener}' aborted: {message}")]
    Aborted {
        /// Listener name.
        listener: String,
        /// Join error detail.
        message: String,
    },
}

impl HookError {
    /// Convenience constructor for listener implementations.
    #[must_use]
    pub fn failed(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ListenerFailed {
            listener: listener.into(),
            message: message.into(),
        }
    }
}

/// A hook listener.
#[async_trait]
pub trait HookListener: Send + Sync {
    /// Listener name used in outcomes and logs.
    fn name(&self) -> &str;

    /// Handle one hook invocation.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] when the listener fails. The error is recorded
    /// and never reaches sibling listeners or the caller.
    async fn on_hook(&self, hook: &HookName, payload: &Payload) -> Result<(), HookError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_hook_names() {
        assert_eq!(HookName::ON_BREACH.as_str(), "on_breach");
        assert_eq!(HookName::AUTO_FLATTEN_START.to_string(), "auto_flatten_start");
        assert_eq!(HookName::custom("auto_flatten_complete"), HookName::AUTO_FLATTEN_COMPLETE);
    }
}
