//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Retry settings for one class of operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, or
    /// the attempt budget is spent. The last error is returned.
    pub async fn run<F, Fut, T, E, R>(&self, operation: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut delay = self.base_delay.min(self.max_delay);

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    metrics::counter!("batch_retries_total", "operation" => operation.to_string())
                        .increment(1);

                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
