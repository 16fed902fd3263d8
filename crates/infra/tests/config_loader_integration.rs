//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading a configuration file and building
//! the governance components from it.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use specforge_core::{FairnessMiddleware, PerUserLimiter, PhaseGuards, StaticTierResolver};
use specforge_domain::{JobId, PipelinePhase, SpecForgeError, TenantId, TierName};
use specforge_infra::config;

const FULL_CONFIG: &str = r#"
[tiers]
default_tier = "free"

[tiers.limits]
free = 1
pro = 4
enterprise = 16

[fairness]
base_snooze_ms = 2000
jitter_ms = 1000
max_deferrals = 30

[rate_limiter]
requests_per_minute = 120
burst_factor = 8

[circuit_breakers.conversion]
failure_threshold = 3
reset_timeout_ms = 20000
half_open_max_calls = 2

[retry.placement]
max_attempts = 4
initial_backoff_ms = 250
max_backoff_ms = 4000

[lock]
key_prefix = "tests:lock:"
ttl_ms = 12000

[telemetry]
filter = "specforge=debug"
json = true
"#;

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    file
}

#[test]
fn test_load_full_toml_config() -> anyhow::Result<()> {
    let file = write_config(".toml", FULL_CONFIG);

    let config = config::load_from_file(Some(file.path().to_path_buf()))?;

    assert_eq!(config.tiers.limits.get("pro"), Some(&4));
    assert_eq!(config.fairness.max_deferrals, Some(30));
    assert_eq!(config.rate_limiter.requests_per_minute, 120);
    assert_eq!(config.circuit_breakers.conversion.failure_threshold, 3);
    assert_eq!(config.retry.placement.max_attempts, 4);
    assert_eq!(config.lock.key_for("sweep"), "tests:lock:sweep");
    assert_eq!(config.lock.heartbeat_interval(), Duration::from_millis(4_000));
    assert!(config.telemetry.json);
    Ok(())
}

/// Validates that a loaded configuration wires into working components.
///
/// Assertions:
/// - Tier ceilings from the file reach the limiter.
/// - Per-phase breaker settings reach the phase guards.
#[test]
fn test_loaded_config_builds_components() -> anyhow::Result<()> {
    let file = write_config(".toml", FULL_CONFIG);
    let config = config::load_from_file(Some(file.path().to_path_buf()))?;

    let limiter = Arc::new(PerUserLimiter::new(config.tiers.to_limits()?));
    let middleware = FairnessMiddleware::new(
        Arc::clone(&limiter),
        Arc::new(StaticTierResolver::new()),
        &config.fairness,
    );
    assert_eq!(middleware.limiter().ceiling(&TierName::pro()), 4);

    let tenant = TenantId::parse("acme").ok_or_else(|| anyhow::anyhow!("invalid tenant"))?;
    for job in 1..=4 {
        assert!(limiter.try_acquire(&tenant, &TierName::pro(), JobId(job)));
    }
    assert!(!limiter.try_acquire(&tenant, &TierName::pro(), JobId(5)));

    let guards = PhaseGuards::from_config(&config)?;
    assert_eq!(guards.breaker(PipelinePhase::Conversion).config().failure_threshold, 3);
    assert_eq!(guards.retry_config(PipelinePhase::Placement).max_attempts, 4);
    assert_eq!(guards.rate_limiter().get().config().burst_factor, 8);
    Ok(())
}

#[test]
fn test_load_config_from_json_file() {
    let file = write_config(
        ".json",
        r#"{
            "tiers": { "default_tier": "pro", "limits": { "pro": 2 } },
            "coordination": { "redis_url": "redis://json-host:6379" }
        }"#,
    );

    let config = config::load_from_file(Some(file.path().to_path_buf())).unwrap();

    assert_eq!(config.tiers.default_tier, "pro");
    assert_eq!(config.coordination.redis_url, "redis://json-host:6379");
}

#[test]
fn test_zero_ceiling_is_rejected_at_load() {
    let file = write_config(".toml", "[tiers.limits]\nfree = 0\n");

    let result = config::load_from_file(Some(file.path().to_path_buf()));

    assert!(matches!(result, Err(SpecForgeError::Config(_))));
}

#[test]
fn test_missing_default_tier_is_rejected_at_load() {
    let file = write_config(".toml", "[tiers]\ndefault_tier = \"gold\"\n");

    let result = config::load_from_file(Some(file.path().to_path_buf()));

    assert!(matches!(result, Err(SpecForgeError::Config(_))));
}
