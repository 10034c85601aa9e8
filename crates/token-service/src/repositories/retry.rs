//! Timeout and retry-once wrapper for persistence calls.

use super::StoreError;
use crate::errors::TokenError;
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;

/// Every persistence call is attempted at most this many times.
pub const MAX_ATTEMPTS: u32 = 2;

/// Wraps persistence calls with a per-attempt timeout and a single retry.
///
/// A call that fails (or times out) twice surfaces as
/// [`TokenError::PersistenceUnavailable`]. There is no backoff: the second
/// attempt is immediate, since the request is already waiting on us.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `call`, retrying once on failure.
    ///
    /// `call` is invoked once per attempt, so it must build a fresh future each
    /// time (clone owned arguments inside the closure).
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, TokenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut last_error = StoreError::Unavailable("no attempt made".to_string());

        for attempt in 1..=MAX_ATTEMPTS {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            target: "token.persistence",
                            operation = operation,
                            attempt = attempt,
                            "Persistence call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "token.persistence",
                        operation = operation,
                        attempt = attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Persistence call failed"
                    );
                    if attempt < MAX_ATTEMPTS {
                        metrics::record_persistence_retry(operation);
                    }
                    last_error = e;
                }
            }
        }

        Err(TokenError::PersistenceUnavailable(format!(
            "{operation}: {last_error}"
        )))
    }
}
