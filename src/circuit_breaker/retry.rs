use super::types::RetryConfig;
use crate::metrics;
use backoff::backoff::{Backoff, Constant};
use std::future::Future;
use tracing::{debug, warn};

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute a function with retries.
    ///
    /// Makes at most `max_retries + 1` attempts and returns the first success
    /// or the last error.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_with_predicate(f, |_| true).await
    }

    /// Execute with retries, but only if error matches predicate
    pub async fn execute_with_predicate<F, Fut, T, E, P>(
        &self,
        mut f: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                attempt,
                max_retries = self.config.max_retries,
                "Executing attempt"
            );

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "Attempt succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        debug!(attempt, error = %e, "Error not retryable");
                        return Err(e);
                    }

                    if attempt > self.config.max_retries {
                        warn!(
                            attempt,
                            max_retries = self.config.max_retries,
                            error = %e,
                            "Attempt failed after max retries"
                        );
                        return Err(e);
                    }

                    // Constant never runs dry
                    let wait = backoff.next_backoff().unwrap_or_else(|| self.config.delay());
                    debug!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying after delay"
                    );
                    metrics::record_retry();
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn create_backoff(&self) -> Constant {
        Constant::new(self.config.delay())
    }
}
