//! Per-phase circuit breakers and retry policies
//!
//! Each pipeline phase gets its own breaker and retry policy; all phases share
//! one rate limiter because they call the same provider.

use specforge_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, ConfigError, RateLimiterConfig, RetryConfig,
    SharedRateLimiter,
};
use specforge_domain::{
    CircuitBreakerSettings, Config, PipelinePhase, Result, RetrySettings, SpecForgeError,
};
use tracing::info;

#[derive(Debug)]
struct PhaseGuard {
    breaker: CircuitBreaker,
    retry: RetryConfig,
}

/// Resilience guards for every pipeline phase
#[derive(Debug)]
pub struct PhaseGuards {
    phases: [PhaseGuard; 3],
    rate_limiter: SharedRateLimiter,
}

impl PhaseGuards {
    /// Build guards from validated configuration
    ///
    /// # Errors
    /// Returns `SpecForgeError::Config` if any phase's settings are invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let build = |phase: PipelinePhase| -> Result<PhaseGuard> {
            let breaker = CircuitBreaker::new(
                format!("provider.{phase}"),
                breaker_config(config.circuit_breakers.for_phase(phase)),
            )
            .map_err(|e| config_error(phase, e))?;
            let retry = retry_config(config.retry.for_phase(phase))
                .map_err(|e| config_error(phase, e))?;
            Ok(PhaseGuard { breaker, retry })
        };

        let rate_limiter = SharedRateLimiter::new(RateLimiterConfig::new(
            config.rate_limiter.requests_per_minute,
            config.rate_limiter.burst_factor,
        ))
        .map_err(|e| SpecForgeError::Config(format!("rate_limiter: {e}")))?;

        Ok(Self {
            phases: [
                build(PipelinePhase::Classification)?,
                build(PipelinePhase::Conversion)?,
                build(PipelinePhase::Placement)?,
            ],
            rate_limiter,
        })
    }

    fn guard(&self, phase: PipelinePhase) -> &PhaseGuard {
        match phase {
            PipelinePhase::Classification => &self.phases[0],
            PipelinePhase::Conversion => &self.phases[1],
            PipelinePhase::Placement => &self.phases[2],
        }
    }

    pub fn breaker(&self, phase: PipelinePhase) -> &CircuitBreaker {
        &self.guard(phase).breaker
    }

    pub fn retry_config(&self, phase: PipelinePhase) -> &RetryConfig {
        &self.guard(phase).retry
    }

    pub fn rate_limiter(&self) -> &SharedRateLimiter {
        &self.rate_limiter
    }

    /// Close every breaker and drop the rate limiter instance
    pub fn reset(&self) {
        for guard in &self.phases {
            guard.breaker.reset();
        }
        self.rate_limiter.reset();
        info!("phase_guards.reset");
    }
}

fn config_error(phase: PipelinePhase, error: ConfigError) -> SpecForgeError {
    SpecForgeError::Config(format!("{phase}: {error}"))
}

fn breaker_config(settings: &CircuitBreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        reset_timeout: settings.reset_timeout(),
        half_open_max_calls: settings.half_open_max_calls,
    }
}

/// Exponential backoff with equal jitter, bounded only by the attempt count
fn retry_config(settings: &RetrySettings) -> std::result::Result<RetryConfig, ConfigError> {
    RetryConfig::builder()
        .max_attempts(settings.max_attempts)
        .exponential_backoff(settings.initial_backoff(), 2.0, settings.max_backoff())
        .equal_jitter()
        .unlimited_time()
        .build()
}
