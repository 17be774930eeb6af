use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::AwosResult;

/// Bounded retry for mutating calls (`put`, `copy`).
///
/// Waits double from `min_backoff` and never exceed `max_backoff`; with the
/// defaults a failing write is attempted three times, waiting 1s then 2s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.min_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is reached. Every attempt is a fresh call.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> AwosResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AwosResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let wait = self.backoff(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Retrying failed storage write"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
