//! Generic reliability primitives shared across SpecForge crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: configuration errors and synchronization primitives
//! - `runtime`: async resilience patterns (circuit breaker, rate limiter,
//!   retry) built on tokio

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitGuard, CircuitState, Clock, ConfigError, ConfigResult, Jitter,
    MockClock, OperationError, RateLimitError, RateLimiter, RateLimiterConfig, RetryConfig,
    RetryConfigBuilder, RetryError, RetryExecutor, RetryOutcome, RetryResult, SharedRateLimiter,
    SystemClock,
};
