//! Retry decorator with exponential backoff for position manager calls.
//!
//! Only transient failures ([`PositionManagerError::is_transient`]) are
//! retried: connection errors and rate limiting. Rejections and missing
//! positions are returned immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use risk_guard::infrastructure::position_manager::{RetryPolicy, RetryingPositionManager};
//!
//! let manager = RetryingPositionManager::new(broker, RetryPolicy::with_attempts(3));
//! ```

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::application::ports::{
    ClosePositionRequest, ClosePositionResponse, PositionManagerError, PositionManagerPort,
};

/// Retry policy for close calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call (default: 3).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 2s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Default policy with a custom number of retries.
    #[must_use]
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: u64::try_from(policy.initial_backoff.as_millis())
                .unwrap_or(u64::MAX),
            max_backoff_ms: u64::try_from(policy.max_backoff.as_millis()).unwrap_or(u64::MAX),
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Get the next backoff duration with jitter.
    ///
    /// Returns `None` if max attempts exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base_backoff_ms = self.calculate_base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_backoff_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.current_attempt += 1;

        Some(Duration::from_millis(capped_ms))
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn calculate_base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    /// Random value in [backoff * (1 - jitter), backoff * (1 + jitter)].
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return backoff_ms;
        }
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;
        rand::rng().random_range(min..=max) as u64
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Check if more retries are available.
    #[must_use]
    pub const fn has_remaining_attempts(&self) -> bool {
        self.current_attempt < self.max_attempts
    }
}

/// Position manager that retries transient failures of an inner manager.
#[derive(Debug)]
pub struct RetryingPositionManager<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> RetryingPositionManager<P> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrapped manager.
    #[must_use]
    pub const fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: PositionManagerPort> PositionManagerPort for RetryingPositionManager<P> {
    async fn close_position_direct(
        &self,
        request: ClosePositionRequest,
    ) -> Result<ClosePositionResponse, PositionManagerError> {
        let mut backoff = ExponentialBackoffCalculator::new(&self.policy);
        loop {
            match self.inner.close_position_direct(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    let Some(delay) = backoff.next_backoff() else {
                        tracing::warn!(
                            contract_id = %request.contract_id,
                            attempts = backoff.current_attempt() + 1,
                            error = %e,
                            "Close retries exhausted"
                        );
                        return Err(e);
                    };
                    tracing::debug!(
                        contract_id = %request.contract_id,
                        retry = backoff.current_attempt(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying close after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::MockPositionManagerPort;
    use crate::domain::event::{AccountId, ContractId};
    use crate::infrastructure::position_manager::SimulatedPositionManager;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    fn request() -> ClosePositionRequest {
        ClosePositionRequest::new(ContractId::new("X"), AccountId::new("ACC"), "breach")
    }

    fn connection_error() -> PositionManagerError {
        PositionManagerError::Connection {
            message: "reset".to_string(),
        }
    }

    #[test]
    fn exponential_backoff_sequence() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        let mut backoff = ExponentialBackoffCalculator::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert!(backoff.next_backoff().is_none());
        assert!(!backoff.has_remaining_attempts());
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let mut backoff = ExponentialBackoffCalculator::new(&policy);
            let delay = backoff.next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(80) && delay <= Duration::from_millis(120));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockPositionManagerPort::new();
        mock.expect_close_position_direct()
            .times(3)
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(connection_error())
                } else {
                    Ok(ClosePositionResponse::flattened(Decimal::ONE))
                }
            });

        let manager = RetryingPositionManager::new(mock, fast_policy(3));
        let response = manager.close_position_direct(request()).await.unwrap();

        assert!(response.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut mock = MockPositionManagerPort::new();
        mock.expect_close_position_direct()
            .times(3)
            .returning(|_| Err(PositionManagerError::RateLimited));

        let manager = RetryingPositionManager::new(mock, fast_policy(2));
        let err = manager.close_position_direct(request()).await.unwrap_err();

        assert_eq!(err, PositionManagerError::RateLimited);
    }

    #[tokio::test]
    async fn retries_reach_the_wrapped_manager() {
        let simulator = SimulatedPositionManager::new();
        simulator.fail_next(connection_error());
        let manager = RetryingPositionManager::new(simulator, fast_policy(1));

        let response = manager
            .close_position_direct(request().with_expected_size(3))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(manager.inner().closes().len(), 2);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let mut mock = MockPositionManagerPort::new();
        mock.expect_close_position_direct().times(1).returning(|_| {
            Err(PositionManagerError::Rejected {
                reason: "market closed".to_string(),
            })
        });

        let manager = RetryingPositionManager::new(mock, fast_policy(5));
        let err = manager.close_position_direct(request()).await.unwrap_err();

        assert!(matches!(err, PositionManagerError::Rejected { .. }));
    }
}
