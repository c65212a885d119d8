//! Retry policy object shared by the pool manager and the optimizer

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::{Result, SluiceError};

use super::BackoffStrategy;

/// Transitions of a retried operation, logged as they happen
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    /// An attempt failed and another one is scheduled after `delay`
    Retrying {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The operation succeeded after at least one retry
    Succeeded { attempts: u32 },
    /// Every attempt failed
    Exhausted { attempts: u32, error: String },
}

impl RetryEvent {
    fn log(&self, label: &str) {
        match self {
            RetryEvent::Retrying {
                attempt,
                delay,
                error,
            } => tracing::warn!(
                operation = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            ),
            RetryEvent::Succeeded { attempts } => {
                tracing::info!(operation = label, attempts, "succeeded after retry")
            }
            RetryEvent::Exhausted { attempts, error } => tracing::error!(
                operation = label,
                attempts,
                error = %error,
                "retries exhausted"
            ),
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once)
    max_retries: u32,
    backoff: BackoffStrategy,
    /// Whether statement-level failures (`Query`, `Driver`) are retried too
    retry_on_query_error: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
            retry_on_query_error: true,
        }
    }

    /// A policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self::new(0, BackoffStrategy::default())
    }

    /// Set whether to retry on query errors (default: true)
    ///
    /// When false, only connection-level failures and timeouts are retried.
    pub fn with_retry_on_query_error(mut self, retry: bool) -> Self {
        self.retry_on_query_error = retry;
        self
    }

    /// Same backoff, different retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    pub fn retry_on_query_error(&self) -> bool {
        self.retry_on_query_error
    }

    /// Check if the error should trigger another attempt
    pub fn should_retry(&self, error: &SluiceError) -> bool {
        match error {
            SluiceError::Connection { .. } | SluiceError::Timeout(_) => true,
            SluiceError::Query(_) | SluiceError::Driver(_) | SluiceError::Other(_) => {
                self.retry_on_query_error
            }
            other => other.is_retryable() && self.retry_on_query_error,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget runs out.
    ///
    /// The closure receives the zero-based attempt number. Errors that can
    /// never change on retry come back unchanged; a final transient failure
    /// is wrapped by [`SluiceError::retries_exhausted`].
    pub async fn run<F, Fut, T>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_unless(label, operation, |_| false).await
    }

    /// [`run`](Self::run), but errors for which `permanent` holds are
    /// returned unchanged right away, whatever their kind.
    pub async fn run_unless<F, Fut, T, P>(
        &self,
        label: &str,
        mut operation: F,
        permanent: P,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&SluiceError) -> bool,
    {
        let mut attempt = 0u32;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        RetryEvent::Succeeded {
                            attempts: attempt + 1,
                        }
                        .log(label);
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() || permanent(&err) => return Err(err),
                Err(err) => {
                    if !self.should_retry(&err) || attempt >= self.max_retries {
                        let attempts = attempt + 1;
                        if attempt > 0 {
                            RetryEvent::Exhausted {
                                attempts,
                                error: err.to_string(),
                            }
                            .log(label);
                        }
                        return Err(SluiceError::retries_exhausted(attempts, err));
                    }

                    let delay = self.backoff.calculate_delay(attempt);
                    RetryEvent::Retrying {
                        attempt: attempt + 1,
                        delay,
                        error: err.to_string(),
                    }
                    .log(label);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}
