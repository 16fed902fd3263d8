//! Circuit breaker for protecting a failure-prone downstream dependency
//!
//! One breaker guards one dependency (for example one AI pipeline phase).
//! Callers consult [`CircuitBreaker::allow`] before each attempt and report
//! the outcome through [`CircuitBreaker::record_success`] or
//! [`CircuitBreaker::record_failure`]. State and counters live behind a single
//! mutex so the `Open -> HalfOpen` transition and the trial accounting happen
//! in one step.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

//==============================================================================
// Error Types
//==============================================================================

/// Configuration error raised at construction time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

//==============================================================================
// State and Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing a bounded number of trials
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before an open circuit admits a trial
    pub reset_timeout: Duration,
    /// Maximum number of trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60), half_open_max_calls: 1 }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_calls: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<Instant>,
}

/// Gate consulted around each call to a guarded dependency
///
/// The retry orchestrator only needs these operations, so it holds a
/// `dyn CircuitGuard` rather than a concrete breaker type.
pub trait CircuitGuard: Send + Sync {
    /// Whether a call may proceed now
    fn allow(&self) -> bool;
    /// Report a successful call
    fn record_success(&self);
    /// Report a failed call
    fn record_failure(&self);
    /// Hand back an admission whose call was abandoned by the caller
    ///
    /// Says nothing about the dependency's health.
    fn record_abandoned(&self) {}
}

//==============================================================================
// Circuit Breaker
//==============================================================================

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_calls: u32,
    last_failure_at: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_calls: 0,
            last_failure_at: None,
            total_successes: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }
}

/// Failure-tripped circuit breaker
///
/// Clones share state, so one breaker can be handed to every caller of the
/// dependency it guards.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock
    pub fn with_clock(
        name: impl Into<Arc<str>>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(BreakerState::closed())),
            clock: Arc::new(clock),
        })
    }

    /// Name of the dependency this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call may proceed, transitioning `Open -> HalfOpen`
    /// when the reset timeout has elapsed.
    ///
    /// The call that observes the expiry is admitted as the first trial.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = inner.last_failure_at.map_or(true, |failed_at| {
                    self.clock.now().saturating_duration_since(failed_at)
                        >= self.config.reset_timeout
                });

                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 1;
                    info!(breaker = %self.name, "circuit_breaker.half_open");
                    true
                } else {
                    inner.rejected_calls += 1;
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    inner.rejected_calls += 1;
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.half_open_calls = 0;
                info!(breaker = %self.name, "circuit_breaker.closed");
            }
            CircuitState::Open => {
                // A call admitted before the trip finished late.
                debug!(breaker = %self.name, "circuit_breaker.success_while_open");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure_at = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit_breaker.opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_calls = 0;
                inner.last_failure_at = Some(now);
                warn!(breaker = %self.name, "circuit_breaker.trial_failed");
            }
            CircuitState::Open => {
                inner.last_failure_at = Some(now);
            }
        }
    }

    /// Return an admitted call that ended without an outcome
    ///
    /// Counts neither as success nor as failure. A half-open trial slot taken
    /// by the call is freed so another caller can try.
    pub fn record_abandoned(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.half_open_calls > 0 {
            inner.half_open_calls -= 1;
            debug!(breaker = %self.name, "circuit_breaker.trial_abandoned");
        }
    }

    /// Force the breaker closed with all counters zeroed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerState::closed();
        info!(breaker = %self.name, "circuit_breaker.reset");
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive-failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Snapshot of breaker counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_calls: inner.half_open_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            last_failure_at: inner.last_failure_at,
        }
    }
}

impl<C: Clock> CircuitGuard for CircuitBreaker<C> {
    fn allow(&self) -> bool {
        CircuitBreaker::allow(self)
    }

    fn record_success(&self) {
        CircuitBreaker::record_success(self);
    }

    fn record_failure(&self) {
        CircuitBreaker::record_failure(self);
    }

    fn record_abandoned(&self) {
        CircuitBreaker::record_abandoned(self);
    }
}
