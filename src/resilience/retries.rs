//! Retry logic.
//!
//! # Responsibilities
//! - Carry a bounded retry policy (attempts, min/max wait)
//! - Decide whether a retrieval response is worth another attempt
//!
//! # Design Decisions
//! - Fetch and reload each own a separate policy instance
//! - Connection errors always retryable; 429 and 5xx (except 501) for fetches
//! - The reloader applies its own status predicate (see `reloader::http`)

use std::time::Duration;

use crate::config::TransportConfig;
use crate::resilience::backoff::calculate_backoff;

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never zero.
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_wait,
            max_wait,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_transport(config: &TransportConfig) -> Self {
        Self::new(
            config.retries,
            Duration::from_millis(config.retry_wait_min_ms),
            Duration::from_millis(config.retry_wait_max_ms),
        )
    }

    /// Whether another attempt is allowed after `attempt` attempts were made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.min_wait.as_millis() as u64,
            self.max_wait.as_millis() as u64,
        )
    }
}

/// Whether a retrieval response status warrants another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 0 || status == 429 || (status >= 500 && status != 501)
}
