//! Static startup configuration
//!
//! Every section deserializes with defaults for missing fields, so a config
//! file only needs the values it overrides. [`Config::validate`] must pass
//! before any component is built from it.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_SNOOZE_MS, DEFAULT_BURST_FACTOR, DEFAULT_ENTERPRISE_CEILING,
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_FREE_CEILING, DEFAULT_HALF_OPEN_MAX_CALLS,
    DEFAULT_LOCK_KEY_PREFIX, DEFAULT_LOCK_OPERATION_TIMEOUT_MS, DEFAULT_LOCK_TTL_MS,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_ARGS_BYTES, DEFAULT_MAX_DEFERRALS, DEFAULT_PRO_CEILING,
    DEFAULT_REDIS_URL, DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_RESET_TIMEOUT_MS,
    DEFAULT_SNOOZE_JITTER_MS, TIER_ENTERPRISE, TIER_FREE, TIER_PRO,
};
use crate::types::{PipelinePhase, TierLimits, TierName};
use crate::{Result, SpecForgeError};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tiers: TiersConfig,
    pub fairness: FairnessConfig,
    pub rate_limiter: RateLimiterSettings,
    pub circuit_breakers: CircuitBreakerPolicies,
    pub retry: RetryPolicies,
    pub lock: LockConfig,
    pub coordination: CoordinationConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Reject configurations that would fail at call time
    ///
    /// # Errors
    /// Returns `SpecForgeError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.tiers.to_limits().map_err(|e| SpecForgeError::Config(e.to_string()))?;
        self.fairness.validate()?;
        self.rate_limiter.validate()?;
        for phase in PipelinePhase::ALL {
            self.circuit_breakers.for_phase(phase).validate(phase)?;
            self.retry.for_phase(phase).validate(phase)?;
        }
        self.lock.validate()?;
        if self.coordination.redis_url.trim().is_empty() {
            return Err(config_error("coordination.redis_url must not be empty"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> SpecForgeError {
    SpecForgeError::Config(message.into())
}

/// Per-tier concurrency ceilings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub default_tier: String,
    pub limits: BTreeMap<String, u32>,
}

impl Default for TiersConfig {
    fn default() -> Self {
        let limits = [
            (TIER_FREE.to_string(), DEFAULT_FREE_CEILING),
            (TIER_PRO.to_string(), DEFAULT_PRO_CEILING),
            (TIER_ENTERPRISE.to_string(), DEFAULT_ENTERPRISE_CEILING),
        ];
        Self { default_tier: TIER_FREE.to_string(), limits: limits.into_iter().collect() }
    }
}

impl TiersConfig {
    /// Build validated [`TierLimits`]
    pub fn to_limits(&self) -> Result<TierLimits> {
        TierLimits::new(
            self.limits.iter().map(|(tier, ceiling)| (TierName::new(tier), *ceiling)),
            TierName::new(&self.default_tier),
        )
    }
}

/// Admission deferral settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// Fixed part of the snooze applied to a deferred job
    pub base_snooze_ms: u64,
    /// Upper bound of the uniform random addition to the snooze
    pub jitter_ms: u64,
    /// Deferrals allowed before a job is handed back as failed; `None`
    /// leaves the ceiling to the queue backend
    pub max_deferrals: Option<u32>,
    /// Job arguments larger than this are treated as having no tenant
    pub max_args_bytes: usize,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            base_snooze_ms: DEFAULT_BASE_SNOOZE_MS,
            jitter_ms: DEFAULT_SNOOZE_JITTER_MS,
            max_deferrals: Some(DEFAULT_MAX_DEFERRALS),
            max_args_bytes: DEFAULT_MAX_ARGS_BYTES,
        }
    }
}

impl FairnessConfig {
    pub fn base_snooze(&self) -> Duration {
        Duration::from_millis(self.base_snooze_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_args_bytes == 0 {
            return Err(config_error("fairness.max_args_bytes must be greater than 0"));
        }
        if self.max_deferrals == Some(0) {
            return Err(config_error("fairness.max_deferrals must be greater than 0 when set"));
        }
        Ok(())
    }
}

/// Outbound provider pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterSettings {
    pub requests_per_minute: u32,
    pub burst_factor: u32,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_factor: DEFAULT_BURST_FACTOR,
        }
    }
}

impl RateLimiterSettings {
    fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(config_error("rate_limiter.requests_per_minute must be greater than 0"));
        }
        if self.burst_factor == 0 {
            return Err(config_error("rate_limiter.burst_factor must be at least 1"));
        }
        Ok(())
    }
}

/// Circuit breaker thresholds for one dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    fn validate(&self, phase: PipelinePhase) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(config_error(format!(
                "circuit_breakers.{phase}.failure_threshold must be greater than 0"
            )));
        }
        if self.half_open_max_calls == 0 {
            return Err(config_error(format!(
                "circuit_breakers.{phase}.half_open_max_calls must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// One circuit breaker per pipeline phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPolicies {
    pub classification: CircuitBreakerSettings,
    pub conversion: CircuitBreakerSettings,
    pub placement: CircuitBreakerSettings,
}

impl CircuitBreakerPolicies {
    pub fn for_phase(&self, phase: PipelinePhase) -> &CircuitBreakerSettings {
        match phase {
            PipelinePhase::Classification => &self.classification,
            PipelinePhase::Conversion => &self.conversion,
            PipelinePhase::Placement => &self.placement,
        }
    }
}

/// Retry policy for one pipeline phase
///
/// Fields left out of a config file take the generation-phase defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 1_000, max_backoff_ms: 30_000 }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn validate(&self, phase: PipelinePhase) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(config_error(format!("retry.{phase}.max_attempts must be greater than 0")));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(config_error(format!(
                "retry.{phase}.max_backoff_ms must not be less than initial_backoff_ms"
            )));
        }
        Ok(())
    }
}

/// Retry policies per pipeline phase
///
/// Classification is cheap and gets more attempts than the generation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    pub classification: RetrySettings,
    pub conversion: RetrySettings,
    pub placement: RetrySettings,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        let generation = RetrySettings::default();
        Self {
            classification: RetrySettings {
                max_attempts: 5,
                initial_backoff_ms: 500,
                max_backoff_ms: 10_000,
            },
            conversion: generation,
            placement: generation,
        }
    }
}

impl RetryPolicies {
    pub fn for_phase(&self, phase: PipelinePhase) -> &RetrySettings {
        match phase {
            PipelinePhase::Classification => &self.classification,
            PipelinePhase::Conversion => &self.conversion,
            PipelinePhase::Placement => &self.placement,
        }
    }
}

/// Distributed lock settings for singleton scheduled jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub key_prefix: String,
    pub ttl_ms: u64,
    /// Defaults to a third of the TTL
    pub heartbeat_interval_ms: Option<u64>,
    /// Deadline for a single coordination store round trip
    pub operation_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_LOCK_KEY_PREFIX.to_string(),
            ttl_ms: DEFAULT_LOCK_TTL_MS,
            heartbeat_interval_ms: None,
            operation_timeout_ms: DEFAULT_LOCK_OPERATION_TIMEOUT_MS,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.unwrap_or(self.ttl_ms / 3))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Full store key for a lock name
    pub fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    fn validate(&self) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(config_error("lock.ttl_ms must be greater than 0"));
        }
        let heartbeat = self.heartbeat_interval();
        if heartbeat.is_zero() || heartbeat >= self.ttl() {
            return Err(config_error(format!(
                "lock.heartbeat_interval_ms ({}) must be positive and less than ttl_ms ({})",
                heartbeat.as_millis(),
                self.ttl_ms
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(config_error("lock.operation_timeout_ms must be greater than 0"));
        }
        if self.operation_timeout_ms >= self.ttl_ms {
            return Err(config_error(format!(
                "lock.operation_timeout_ms ({}) must be less than ttl_ms ({})",
                self.operation_timeout_ms, self.ttl_ms
            )));
        }
        Ok(())
    }
}

/// Shared coordination store connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub redis_url: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self { redis_url: DEFAULT_REDIS_URL.to_string() }
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { filter: DEFAULT_LOG_FILTER.to_string(), json: false }
    }
}
