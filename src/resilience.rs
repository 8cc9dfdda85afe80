//! Bounded retry with configurable backoff
//!
//! Used by the upload stage: a fixed number of total attempts, with an
//! optional exponential delay between them. The default delay is zero, so
//! failed attempts are retried immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

/// All attempts of an operation failed
#[derive(Debug)]
pub struct RetryError<E> {
    /// Number of attempts made
    pub attempts: usize,
    /// Error returned by the final attempt
    pub last_error: E,
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gave up after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: usize,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`, given that `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: usize) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1).min(i32::MAX as usize) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    ///
    /// The closure receives the 1-based attempt number.
    #[instrument(skip(self, operation))]
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(last_error) => {
                    if attempt >= max_attempts {
                        error!(error = %last_error, "{} failed ({}/{})", operation_name, attempt, max_attempts);
                        return Err(RetryError {
                            attempts: attempt,
                            last_error,
                        });
                    }

                    let delay = self.config.delay_after(attempt);
                    warn!(
                        error = %last_error,
                        delay = ?delay,
                        "{} failed, retrying ({}/{})",
                        operation_name,
                        attempt,
                        max_attempts
                    );

                    if !delay.is_zero() {
                        let actual_delay = if self.config.jitter {
                            let jitter_ms =
                                (delay.as_millis() as f64 * rand::random::<f64>() * 0.1) as u64;
                            delay + Duration::from_millis(jitter_ms)
                        } else {
                            delay
                        };
                        tokio::time::sleep(actual_delay).await;
                    }
                }
            }
        }
    }
}
