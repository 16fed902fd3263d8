//! Bounded retry with explicit retryable/fatal classification
//!
//! Operations report failures as [`OperationError::Retryable`] or
//! [`OperationError::Fatal`]. Only retryable failures are retried, up to
//! `max_attempts`, with jittered backoff between attempts. An optional
//! [`CircuitGuard`] is consulted before every attempt; a rejection fails the
//! whole call immediately without spending an attempt. An attempt abandoned
//! because the caller cancelled ([`OperationError::Cancelled`], or any failure
//! once the executor's token has fired) is never reported to the guard as a
//! failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::{CircuitGuard, ConfigError, ConfigResult};

/// Classification attached to a failed attempt
#[derive(Debug, Error)]
pub enum OperationError<E> {
    /// Failure of this attempt only; another attempt may succeed
    #[error("retryable: {0}")]
    Retryable(E),

    /// Failure that will not succeed on retry
    #[error("fatal: {0}")]
    Fatal(E),

    /// The caller gave up on the attempt; says nothing about the dependency
    #[error("cancelled: {0}")]
    Cancelled(E),
}

impl<E> OperationError<E> {
    /// Mark an error as retryable
    pub fn retryable(error: E) -> Self {
        Self::Retryable(error)
    }

    /// Mark an error as fatal
    pub fn fatal(error: E) -> Self {
        Self::Fatal(error)
    }

    /// Mark an attempt as abandoned by the caller
    pub fn cancelled(error: E) -> Self {
        Self::Cancelled(error)
    }

    /// Whether this failure may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Unwrap the underlying error
    pub fn into_inner(self) -> E {
        match self {
            Self::Retryable(error) | Self::Fatal(error) | Self::Cancelled(error) => error,
        }
    }
}

/// Errors returned by the retry executor
///
/// Every variant carries the number of attempts actually executed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The circuit breaker rejected the call before an attempt could start
    #[error("circuit open, call rejected after {attempts} attempts")]
    CircuitOpen { attempts: u32 },

    /// The operation failed with a non-retryable error
    #[error("fatal error on attempt {attempt}: {source}")]
    Fatal { attempt: u32, source: E },

    /// All attempts failed with retryable errors
    #[error("all {attempts} attempts exhausted, last error: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The caller cancelled during an attempt or while waiting between
    /// attempts
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    /// The total time budget ran out
    #[error("retry timeout exceeded after {elapsed:?} ({attempts} attempts)")]
    TimeoutExceeded { attempts: u32, elapsed: Duration },
}

impl<E> RetryError<E> {
    /// Number of attempts executed before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts }
            | Self::TimeoutExceeded { attempts, .. } => *attempts,
            Self::Fatal { attempt, .. } => *attempt,
        }
    }

    /// Whether the call was rejected by the circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The last operation error, if one was observed
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of a retry execution including summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Linear backoff: initial_delay + (retry * increment)
    Linear { initial_delay: Duration, increment: Duration },
    /// Exponential backoff: initial_delay * base^retry, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay before retry number `retry` (0-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Linear { initial_delay, increment } => {
                initial_delay.saturating_add(increment.saturating_mul(retry))
            }
            BackoffStrategy::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let delay_ms = initial_delay.as_millis() as f64 * base.powi(exponent);
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

/// Jitter applied to backoff delays to avoid synchronized retries
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Full jitter: 0 to calculated_delay
    Full,
    /// Equal jitter: calculated_delay/2 to calculated_delay
    Equal,
    /// Decorrelated jitter: base to base + 3 * calculated_delay
    Decorrelated { base: Duration },
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(random_up_to(millis)),
            Jitter::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + random_up_to(millis - half))
            }
            Jitter::Decorrelated { base } => {
                base.saturating_add(Duration::from_millis(random_up_to(millis.saturating_mul(3))))
            }
        }
    }
}

fn random_up_to(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
    /// Maximum total time to spend retrying
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(500),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::Equal,
            max_total_time: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }

        if let BackoffStrategy::Exponential { base, .. } = &self.backoff {
            if *base <= 0.0 {
                return Err(ConfigError::invalid("exponential base must be greater than 0"));
            }
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn linear_backoff(mut self, initial_delay: Duration, increment: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Linear { initial_delay, increment };
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    pub fn equal_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Equal;
        self
    }

    pub fn max_total_time(mut self, duration: Duration) -> Self {
        self.config.max_total_time = Some(duration);
        self
    }

    pub fn unlimited_time(mut self) -> Self {
        self.config.max_total_time = None;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The retry orchestrator
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    circuit: Option<Arc<dyn CircuitGuard>>,
    cancel: Option<CancellationToken>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("has_circuit", &self.circuit.is_some())
            .finish()
    }
}

impl RetryExecutor {
    /// Create a new executor; the configuration must already be validated
    pub fn new(config: RetryConfig) -> Self {
        Self { config, circuit: None, cancel: None }
    }

    /// Consult `circuit` before each attempt and report outcomes to it
    pub fn with_circuit_breaker(mut self, circuit: Arc<dyn CircuitGuard>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    /// Abort backoff sleeps when `cancel` fires
    ///
    /// A failed attempt observed after `cancel` fired is treated as abandoned.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError<E>>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Execute an operation with retry logic and return outcome statistics
    #[instrument(skip_all, fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError<E>>>,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut total_delay = Duration::ZERO;

        let finish = |result, attempts, total_delay| RetryOutcome { result, attempts, total_delay };

        loop {
            if let Some(max_time) = self.config.max_total_time {
                let elapsed = started.elapsed();
                if elapsed >= max_time {
                    warn!(attempts, elapsed_ms = elapsed.as_millis() as u64, "retry.timeout");
                    return finish(
                        Err(RetryError::TimeoutExceeded { attempts, elapsed }),
                        attempts,
                        total_delay,
                    );
                }
            }

            if let Some(circuit) = &self.circuit {
                if !circuit.allow() {
                    debug!(attempts, "retry.circuit_open");
                    return finish(Err(RetryError::CircuitOpen { attempts }), attempts, total_delay);
                }
            }

            attempts += 1;
            debug!(attempt = attempts, max_attempts = self.config.max_attempts, "retry.attempt");

            let error = match operation().await {
                Ok(value) => {
                    if let Some(circuit) = &self.circuit {
                        circuit.record_success();
                    }
                    if attempts > 1 {
                        debug!(attempts, "retry.recovered");
                    }
                    return finish(Ok(value), attempts, total_delay);
                }
                Err(error) => error,
            };

            let error = if self.is_cancelled() {
                OperationError::Cancelled(error.into_inner())
            } else {
                error
            };

            let source = match error {
                OperationError::Cancelled(_) => {
                    if let Some(circuit) = &self.circuit {
                        circuit.record_abandoned();
                    }
                    debug!(attempt = attempts, "retry.cancelled");
                    return finish(Err(RetryError::Cancelled { attempts }), attempts, total_delay);
                }
                OperationError::Fatal(source) => {
                    if let Some(circuit) = &self.circuit {
                        circuit.record_failure();
                    }
                    debug!(attempt = attempts, error = ?source, "retry.fatal");
                    return finish(
                        Err(RetryError::Fatal { attempt: attempts, source }),
                        attempts,
                        total_delay,
                    );
                }
                OperationError::Retryable(source) => {
                    if let Some(circuit) = &self.circuit {
                        circuit.record_failure();
                    }
                    source
                }
            };

            if attempts >= self.config.max_attempts {
                warn!(attempts, error = ?source, "retry.exhausted");
                let exhausted = RetryError::Exhausted { attempts, source };
                return finish(Err(exhausted), attempts, total_delay);
            }

            let delay = self.config.jitter.apply(self.config.backoff.calculate_delay(attempts - 1));
            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = ?source,
                "retry.backing_off"
            );

            if !self.sleep(delay).await {
                return finish(Err(RetryError::Cancelled { attempts }), attempts, total_delay);
            }
            total_delay += delay;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleep for `delay`; returns false if cancelled first.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
