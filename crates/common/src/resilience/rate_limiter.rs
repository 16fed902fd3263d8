//! Token bucket rate limiting for outbound calls
//!
//! The bucket holds at most `burst_factor` tokens and refills continuously at
//! `requests_per_minute / 60` tokens per second. [`RateLimiter::wait`] computes
//! the exact time until the next token from the deficit and sleeps that long,
//! releasing the bucket lock while it sleeps.
//!
//! [`SharedRateLimiter`] is the per-dependency handle: it builds the limiter
//! lazily on first use and lets tests replace or reset the instance.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::circuit_breaker::{ConfigError, ConfigResult};
use super::clock::{Clock, SystemClock};

/// Errors returned by [`RateLimiter::wait`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The caller's cancellation token fired before a token was available
    #[error("rate limiter wait cancelled")]
    Cancelled,

    /// The caller's deadline passed before a token was available
    #[error("rate limiter wait exceeded deadline of {timeout:?}")]
    DeadlineExceeded { timeout: Duration },
}

/// Configuration for a token bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Sustained request rate
    pub requests_per_minute: u32,
    /// Bucket capacity (maximum burst)
    pub burst_factor: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { requests_per_minute: 60, burst_factor: 5 }
    }
}

impl RateLimiterConfig {
    pub const fn new(requests_per_minute: u32, burst_factor: u32) -> Self {
        Self { requests_per_minute, burst_factor }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.requests_per_minute == 0 {
            return Err(ConfigError::invalid("requests_per_minute must be greater than 0"));
        }
        if self.burst_factor == 0 {
            return Err(ConfigError::invalid("burst_factor must be at least 1"));
        }
        Ok(())
    }

    /// Refill rate in tokens per second
    pub fn tokens_per_second(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst_factor)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// # Examples
///
/// ```rust
/// use specforge_common::resilience::{RateLimiter, RateLimiterConfig};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RateLimiter::new(RateLimiterConfig { requests_per_minute: 120, burst_factor: 2 })?;
///
/// assert!(limiter.try_acquire());
/// assert!(limiter.try_acquire());
/// assert!(!limiter.try_acquire());
/// # Ok(())
/// # }
/// ```
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
    clock: C,
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish()
    }
}

impl RateLimiter<SystemClock> {
    /// Create a limiter backed by the system clock; the bucket starts full
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter with a custom clock
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config, clock))
    }

    fn from_validated(config: RateLimiterConfig, clock: C) -> Self {
        let bucket = Bucket { tokens: config.capacity(), last_refill: clock.now() };
        Self { config, bucket: Mutex::new(bucket), clock }
    }

    /// Configuration in effect
    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.config.tokens_per_second())
                .min(self.config.capacity());
            bucket.last_refill = now;
        }
    }

    /// Take a token if one is available, or report how long until one is.
    fn take_or_deficit(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - bucket.tokens;
        Err(Duration::from_secs_f64(deficit / self.config.tokens_per_second()))
    }

    /// Non-blocking check-and-consume
    pub fn try_acquire(&self) -> bool {
        self.take_or_deficit().is_ok()
    }

    /// Current fractional token count
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Wait until a token is available or `cancel` fires.
    ///
    /// No token is consumed when the wait is cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            let delay = match self.take_or_deficit() {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };

            trace!(delay_ms = delay.as_millis() as u64, "rate_limiter.waiting");

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("rate_limiter.wait_cancelled");
                    return Err(RateLimitError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Like [`RateLimiter::wait`], bounded by `timeout`.
    pub async fn wait_timeout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        tokio::time::timeout(timeout, self.wait(cancel))
            .await
            .map_err(|_| RateLimitError::DeadlineExceeded { timeout })?
    }

    /// Refill the bucket to capacity
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = self.config.capacity();
        bucket.last_refill = self.clock.now();
    }
}

/// Lazily-initialized rate limiter shared by every caller of one dependency
///
/// The owning component constructs one handle and passes clones to its
/// callers. `replace` and `reset` exist for tests that need a specific bucket
/// or a fresh one.
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    config: RateLimiterConfig,
    slot: Arc<RwLock<Option<Arc<RateLimiter>>>>,
}

impl SharedRateLimiter {
    /// Create a handle; the limiter itself is built on first `get`
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, slot: Arc::new(RwLock::new(None)) })
    }

    /// Return the current limiter, building it if needed
    pub fn get(&self) -> Arc<RateLimiter> {
        if let Some(limiter) = self.slot.read().as_ref() {
            return Arc::clone(limiter);
        }

        let mut slot = self.slot.write();
        // Another caller may have initialized it between the two locks.
        if let Some(limiter) = slot.as_ref() {
            return Arc::clone(limiter);
        }

        let limiter = Arc::new(RateLimiter::from_validated(self.config, SystemClock));
        *slot = Some(Arc::clone(&limiter));
        debug!(
            rpm = self.config.requests_per_minute,
            burst = self.config.burst_factor,
            "rate_limiter.initialized"
        );
        limiter
    }

    /// Install a specific limiter instance
    pub fn replace(&self, limiter: Arc<RateLimiter>) {
        *self.slot.write() = Some(limiter);
    }

    /// Drop the current limiter so the next `get` rebuilds it
    pub fn reset(&self) {
        *self.slot.write() = None;
    }

    /// Whether a limiter has been built
    pub fn is_initialized(&self) -> bool {
        self.slot.read().is_some()
    }
}
