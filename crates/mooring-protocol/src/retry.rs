//! Retry and recovery policy.
//!
//! Pure decisions over [`ClassifiedError`]: no clocks, no I/O. Delays grow
//! exponentially with ±jitter to avoid synchronized retries across
//! connections, and rate-limited errors honor a server-supplied retry-after.

use crate::error::{ClassifiedError, ErrorCode, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the caller should do about a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-issue the same operation after a delay
    Retry,
    /// Tear the connection down and reconnect, then re-issue
    Reconnect,
    /// Surface the error, no recovery possible
    Fail,
    /// Drop the error, it carries no consequence
    Ignore,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts for ordinary retryable errors
    pub max_attempts: u32,
    /// Higher cap for rate-limited errors, which resolve given patience
    pub rate_limit_max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any delay, jitter included
    pub max_delay: Duration,
    /// Exponential growth factor per attempt
    pub multiplier: f64,
    /// Jitter factor in [0.0, 1.0]; 0.3 means ±30%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Decide the recovery action for an error.
    pub fn decide(&self, error: &ClassifiedError) -> RecoveryAction {
        if !error.recoverable {
            return RecoveryAction::Fail;
        }
        if error.retryable {
            if error.is_connection_error() {
                RecoveryAction::Reconnect
            } else {
                RecoveryAction::Retry
            }
        } else if error.severity == Severity::Low {
            RecoveryAction::Ignore
        } else {
            RecoveryAction::Fail
        }
    }

    /// Whether attempt number `attempt` (1-based) may proceed. Client-input
    /// errors never retry, regardless of attempt.
    pub fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        if matches!(
            error.code,
            ErrorCode::ParseError | ErrorCode::InvalidRequest | ErrorCode::InvalidParams
        ) {
            return false;
        }
        if !error.retryable {
            return false;
        }
        let cap = if error.code == ErrorCode::RateLimited {
            self.rate_limit_max_attempts
        } else {
            self.max_attempts
        };
        attempt <= cap
    }

    /// Delay before attempt number `attempt` (1-based). A server-supplied
    /// retry-after wins over the computed backoff; both are capped.
    pub fn delay(&self, error: &ClassifiedError, attempt: u32) -> Duration {
        if let Some(retry_after) = error.retry_after {
            return retry_after.min(self.max_delay);
        }
        self.backoff_delay(attempt)
    }

    /// Exponential backoff with jitter for attempt number `attempt`
    /// (1-based), capped at `max_delay` jitter included.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let jitter = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter;
        let jittered_ms = (capped_ms * jitter).min(self.max_delay.as_millis() as f64);

        Duration::from_millis(jittered_ms as u64)
    }
}
