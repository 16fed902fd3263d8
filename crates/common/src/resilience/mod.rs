//! Resilience primitives for calls to failure-prone downstream dependencies
//!
//! - **Circuit Breaker**: stops calling a dependency after sustained failure
//!   and tests it periodically for recovery
//! - **Rate Limiter**: token-bucket pacing of outbound calls
//! - **Retry**: bounded retries with explicit retryable/fatal classification,
//!   consulting a circuit breaker before every attempt
//!
//! All time-dependent components take a [`Clock`] so tests can drive them
//! with [`MockClock`] instead of sleeping.

pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitGuard, CircuitState, ConfigError, ConfigResult,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{RateLimitError, RateLimiter, RateLimiterConfig, SharedRateLimiter};
pub use retry::{
    BackoffStrategy, Jitter, OperationError, RetryConfig, RetryConfigBuilder, RetryError,
    RetryExecutor, RetryOutcome, RetryResult,
};
