//! Unified retry and deadline policy.
//!
//! One policy parameterises connecting and reconnecting; its
//! `call_timeout` bounds every individual external call, alert delivery
//! included. Alert delivery is never retried.

use std::future::Future;
use std::time::Duration;

use crate::{Error, Result};

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay after every failure.
    Fixed(Duration),
    /// `base * attempt` after the n-th failure.
    Linear(Duration),
}

/// Attempt budget, backoff and per-call deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Backoff,
    /// Deadline for a single external call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(d) => d,
            Backoff::Linear(base) => base.saturating_mul(attempt),
        }
    }

    /// Runs `fut` under the call deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the deadline elapses, otherwise the
    /// future's own result.
    pub async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .unwrap_or(Err(Error::Timeout {
                operation,
                after: self.call_timeout,
            }))
    }

    /// Runs `attempt_fn` until it succeeds or the attempt budget is spent.
    ///
    /// Each attempt runs under the call deadline. Errors rejected by
    /// `retryable` end the loop immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        retryable: fn(&Error) -> bool,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.timed(operation, attempt_fn()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max && retryable(&e) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = max,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
