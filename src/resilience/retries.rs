//! Retry logic.
//!
//! # Responsibilities
//! - Drive a single-attempt action through the circuit breaker
//! - Sleep with linear backoff between failed attempts
//! - Stop as soon as the breaker reports it is open
//! - Abort promptly on caller cancellation
//!
//! # Design Decisions
//! - Explicit state machine: Attempting → (Backoff → Attempting)* → Done | Failed
//! - No attempt cap by default; the breaker trips and ends the loop
//! - The backoff sleep races the cancellation token and holds no locks

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};

/// Decides whether a failed attempt may be retried.
pub type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Why a retried call gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The breaker refused the attempt; no further attempts are made.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// The attempt cap was reached.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BreakerError<E> },

    /// The classifier rejected the failure as not worth retrying.
    #[error("non-retryable failure: {0}")]
    Permanent(E),

    /// The caller's cancellation token fired.
    #[error("call cancelled")]
    Cancelled,
}

/// Immutable retry policy.
pub struct RetryPolicy<E> {
    /// `None` keeps retrying until the breaker opens.
    pub max_attempts: Option<u32>,
    /// Delay unit for linear backoff.
    pub backoff_base: Duration,
    classifier: Classifier<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            classifier: self.classifier.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl<E> From<&RetryConfig> for RetryPolicy<E> {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            classifier: Arc::new(|_| true),
        }
    }
}

impl<E> RetryPolicy<E> {
    pub fn new(max_attempts: Option<u32>, backoff_base: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
            classifier: Arc::new(|_| true),
        }
    }

    /// Replace the retryable-failure classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.classifier)(error)
    }

    /// Next state after an attempt completed; `attempts` includes that attempt.
    pub fn after_attempt<T>(&self, outcome: Result<T, BreakerError<E>>, attempts: u32) -> RetryState<T, E> {
        let last = match outcome {
            Ok(value) => return RetryState::Done(value),
            Err(BreakerError::Open { name }) => {
                return RetryState::Failed(RetryError::CircuitOpen { name });
            }
            Err(BreakerError::Failed(e)) if !self.is_retryable(&e) => {
                return RetryState::Failed(RetryError::Permanent(e));
            }
            Err(other) => other,
        };

        match self.max_attempts {
            Some(max) if attempts >= max => RetryState::Failed(RetryError::Exhausted { attempts, last }),
            _ => RetryState::Backoff {
                delay: calculate_backoff(attempts, self.backoff_base),
                last,
            },
        }
    }

    /// Run `attempt` through `breaker` until it succeeds or the policy gives up.
    ///
    /// `attempt` receives the zero-based attempt number.
    pub async fn run<F, Fut, T>(
        &self,
        breaker: &CircuitBreaker,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempts: u32 = 0;
        let mut state = RetryState::Attempting;

        loop {
            state = match state {
                RetryState::Attempting => {
                    let current = attempts;
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        outcome = breaker.call(|| attempt(current)) => Some(outcome),
                    };
                    match outcome {
                        None => RetryState::Failed(RetryError::Cancelled),
                        Some(outcome) => {
                            attempts += 1;
                            self.after_attempt(outcome, attempts)
                        }
                    }
                }
                RetryState::Backoff { delay, last } => {
                    error!(
                        target_name = %breaker.name(),
                        attempt = attempts,
                        error = %last,
                        "remote call attempt failed"
                    );
                    debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Retrying after backoff");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => RetryState::Failed(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => RetryState::Attempting,
                    }
                }
                RetryState::Done(value) => return Ok(value),
                RetryState::Failed(err) => return Err(err),
            };
        }
    }
}

/// Retry driver states.
#[derive(Debug)]
pub enum RetryState<T, E> {
    Attempting,
    Backoff { delay: Duration, last: BreakerError<E> },
    Done(T),
    Failed(RetryError<E>),
}
