//! Retry logic with exponential backoff for whole transfer operations.
//!
//! Upload and download sessions wrap an entire operation (not single calls) in a
//! [`RetryExecutor`]. The default policy retries on any error a small, fixed number of
//! times and then surfaces the last error. Cancellation is never retried.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classification hooks an error type exposes to the retry executor.
pub trait Retryable {
    /// True if the error reports cancellation. Cancellation always stops retrying.
    fn is_cancellation(&self) -> bool {
        false
    }

    /// True if the error is worth another attempt under [`RetryOn::TransientOnly`].
    fn is_transient(&self) -> bool {
        true
    }
}

/// Which failures trigger another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryOn {
    /// Retry every error except cancellation.
    #[default]
    AnyError,
    /// Retry only errors whose [`Retryable::is_transient`] returns true.
    TransientOnly,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (default: 3).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 10 seconds).
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to backoff (default: true).
    pub jitter: bool,
    /// Retry policy (default: any error).
    pub retry_on: RetryOn,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
            retry_on: RetryOn::AnyError,
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded.
    Success(T),
    /// All attempts failed, or a non-retryable error occurred.
    Exhausted {
        /// The last error that occurred.
        last_error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
    /// The cancellation token fired before or between attempts, or the
    /// operation itself reported cancellation.
    Cancelled {
        /// Attempts started before cancellation was observed.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Collapse into a `Result`, building the cancellation error with `cancelled`.
    pub fn into_result(self, cancelled: impl FnOnce() -> E) -> Result<T, E> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
            RetryOutcome::Cancelled { .. } => Err(cancelled()),
        }
    }

    /// True if the operation eventually succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

/// Executor for retry operations.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Access the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic.
    ///
    /// `operation` receives the 1-based attempt number. Backoff sleeps are raced
    /// against `cancel`, so a cancelled token ends the loop promptly.
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }
            attempt += 1;

            let error = match operation(attempt).await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(e) => e,
            };

            if error.is_cancellation() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            let retryable = match self.config.retry_on {
                RetryOn::AnyError => true,
                RetryOn::TransientOnly => error.is_transient(),
            };
            if !retryable || attempt >= max_attempts {
                warn!(attempt, max_attempts, error = %error, "operation failed, giving up");
                return RetryOutcome::Exhausted {
                    last_error: error,
                    attempts: attempt,
                };
            }

            let backoff = self.compute_backoff(attempt - 1);
            debug!(attempt, ?backoff, error = %error, "operation failed, retrying");
            tokio::select! {
                _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: attempt },
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Compute the exponential backoff duration for a given retry index.
    ///
    /// Computes: `initial_backoff * backoff_multiplier^retry`, capped at `max_backoff`.
    /// If jitter is enabled, adds random jitter (0% to 50% of the computed delay).
    fn compute_backoff(&self, retry: u32) -> Duration {
        let base_delay_ms = self.config.initial_backoff.as_millis() as f64;
        let multiplier = self.config.backoff_multiplier;
        let max_delay_ms = self.config.max_backoff.as_millis() as f64;

        let computed = base_delay_ms * multiplier.powi(retry as i32);
        let capped = computed.min(max_delay_ms) as u64;

        if self.config.jitter && capped >= 2 {
            let jitter_ms = rand::thread_rng().gen_range(0..=capped / 2);
            Duration::from_millis(capped.saturating_add(jitter_ms))
        } else {
            Duration::from_millis(capped)
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
