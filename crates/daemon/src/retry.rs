//! Retry policy for operations against unreliable collaborators.
//!
//! A single loop consumes the policy; callers never reschedule work themselves.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves as one.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the wait after every failed attempt.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Wait before attempt number `attempt` (1-based, attempt 1 never waits).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1).saturating_pow(attempt - 2);
        self.initial_backoff.saturating_mul(factor)
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// # Returns
    /// The first success, or the error of the last attempt.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let wait = self.backoff_for(attempt);
                    debug!(attempt, error = %e, wait_ms = wait.as_millis() as u64, "retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
