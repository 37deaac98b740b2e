//! Retry policy for store transactions.
//!
//! Each attempt runs under its own timeout; an elapsed timeout counts as a
//! transient failure. Transient failures are retried with exponential backoff
//! (`initial * 2^(retry-1)`, capped at `max`) until `max_retries` retries are
//! spent. Permanent failures end the cycle immediately.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_initial: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Terminal result of a retry cycle.
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    /// Number of attempts actually issued (>= 1)
    pub attempts: u32,
    pub result: Result<T, StoreError>,
    /// Cancellation ended a backoff before the next attempt
    pub interrupted: bool,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_initial
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }

    /// Run `op` until it succeeds, fails permanently, or retries are exhausted.
    ///
    /// A cancellation observed during backoff ends the cycle with the last
    /// transient error; an attempt already in flight is never interrupted.
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(StoreError::Transient(format!(
                    "attempt timed out after {:?}",
                    self.attempt_timeout
                ))),
            };

            let err = match result {
                Ok(value) => {
                    debug!(batch = label, attempts, "Store transaction committed");
                    return Attempted {
                        attempts,
                        result: Ok(value),
                        interrupted: false,
                    };
                }
                Err(e) => e,
            };

            let retries_used = attempts - 1;
            if !err.is_retryable() || retries_used >= self.max_retries {
                warn!(batch = label, attempts, error = %err, "Store transaction failed");
                return Attempted {
                    attempts,
                    result: Err(err),
                    interrupted: false,
                };
            }

            let delay = self.backoff(attempts);
            warn!(
                batch = label,
                attempt = attempts,
                error = %err,
                "Transient store error, retrying in {:?}",
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    warn!(batch = label, attempts, "Cancelled during backoff");
                    return Attempted {
                        attempts,
                        result: Err(err),
                        interrupted: true,
                    };
                }
            }
        }
    }
}
