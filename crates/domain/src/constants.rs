//! Domain constants
//!
//! Default values for the static configuration surface.

// Tiers
pub const TIER_FREE: &str = "free";
pub const TIER_PRO: &str = "pro";
pub const TIER_ENTERPRISE: &str = "enterprise";
pub const DEFAULT_FREE_CEILING: u32 = 1;
pub const DEFAULT_PRO_CEILING: u32 = 3;
pub const DEFAULT_ENTERPRISE_CEILING: u32 = 10;

// Fairness deferral
pub const DEFAULT_BASE_SNOOZE_MS: u64 = 15_000;
pub const DEFAULT_SNOOZE_JITTER_MS: u64 = 10_000;
pub const DEFAULT_MAX_DEFERRALS: u32 = 120;
pub const DEFAULT_MAX_ARGS_BYTES: usize = 64 * 1024;

// Provider pacing
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_BURST_FACTOR: u32 = 5;

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 1;

// Distributed lock
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "specforge:lock:";
pub const DEFAULT_LOCK_TTL_MS: u64 = 30_000;
pub const DEFAULT_LOCK_OPERATION_TIMEOUT_MS: u64 = 5_000;

// Coordination store
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

// Telemetry
pub const DEFAULT_LOG_FILTER: &str = "info";
