//! Configuration loader
//!
//! Loads the control-plane configuration from a file and environment
//! variables, then validates it before anything is built from it.
//!
//! ## Loading Strategy
//! 1. Use the file named by `SPECFORGE_CONFIG`, or search standard paths
//! 2. Fall back to built-in defaults when no file exists
//! 3. Apply `SPECFORGE_*` environment overrides
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `SPECFORGE_CONFIG`: Explicit config file path
//! - `SPECFORGE_REDIS_URL`: Coordination store URL
//! - `SPECFORGE_RATE_LIMIT_RPM`: Provider requests per minute
//! - `SPECFORGE_RATE_LIMIT_BURST`: Provider burst capacity
//! - `SPECFORGE_LOCK_TTL_MS`: Distributed lock TTL in milliseconds
//! - `SPECFORGE_LOG_FILTER`: Default tracing filter directive
//! - `SPECFORGE_LOG_JSON`: Emit JSON logs (true/false)
//!
//! ## File Locations
//! The loader searches the following paths (in order):
//! 1. `./specforge.toml` or `./specforge.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. `../config.toml` or `../config.json` (parent directory)
//! 4. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use specforge_domain::{Config, Result, SpecForgeError};

use crate::errors::InfraError;

const CONFIG_PATH_VAR: &str = "SPECFORGE_CONFIG";

/// Load configuration from file (if any), defaults, and the environment
///
/// # Errors
/// Returns `SpecForgeError::Config` if:
/// - `SPECFORGE_CONFIG` names a missing file
/// - The file format is invalid
/// - An environment override does not parse
/// - The merged configuration fails validation
pub fn load() -> Result<Config> {
    let explicit = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
    let path = match explicit {
        Some(path) => Some(path),
        None => search_config_paths(),
    };

    let mut config = match path {
        Some(path) => read_config(&path)?,
        None => {
            tracing::debug!("No config file found, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    tracing::info!("Configuration loaded");
    Ok(config)
}

/// Load configuration from defaults plus environment variables only
///
/// # Errors
/// Returns `SpecForgeError::Config` if an override does not parse or the
/// result fails validation.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations. Supports JSON and TOML
/// (detected by file extension). Environment overrides are not applied.
///
/// # Errors
/// Returns `SpecForgeError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => p,
        None => search_config_paths().ok_or_else(|| {
            SpecForgeError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    let config = read_config(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(SpecForgeError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path).map_err(InfraError::from)?;
    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => Ok(toml::from_str(contents).map_err(InfraError::from)?),
        "json" => Ok(serde_json::from_str(contents).map_err(InfraError::from)?),
        _ => Err(SpecForgeError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Search multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn search_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 6] = [
        "specforge.toml",
        "specforge.json",
        "config.toml",
        "config.json",
        "../config.toml",
        "../config.json",
    ];

    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(NAMES.iter().map(|name| cwd.join(name)));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.is_file())
}

/// Overwrite fields from `SPECFORGE_*` environment variables that are set
///
/// # Errors
/// Returns `SpecForgeError::Config` naming the variable that does not parse.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(url) = env_string("SPECFORGE_REDIS_URL") {
        config.coordination.redis_url = url;
    }
    if let Some(rpm) = env_parse("SPECFORGE_RATE_LIMIT_RPM")? {
        config.rate_limiter.requests_per_minute = rpm;
    }
    if let Some(burst) = env_parse("SPECFORGE_RATE_LIMIT_BURST")? {
        config.rate_limiter.burst_factor = burst;
    }
    if let Some(ttl_ms) = env_parse("SPECFORGE_LOCK_TTL_MS")? {
        config.lock.ttl_ms = ttl_ms;
    }
    if let Some(filter) = env_string("SPECFORGE_LOG_FILTER") {
        config.telemetry.filter = filter;
    }
    if let Some(json) = env_bool("SPECFORGE_LOG_JSON") {
        config.telemetry.json = json;
    }
    Ok(())
}

/// Non-empty value of `key`
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| SpecForgeError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
/// Returns `None` when unset.
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const OVERRIDE_VARS: [&str; 7] = [
        "SPECFORGE_CONFIG",
        "SPECFORGE_REDIS_URL",
        "SPECFORGE_RATE_LIMIT_RPM",
        "SPECFORGE_RATE_LIMIT_BURST",
        "SPECFORGE_LOCK_TTL_MS",
        "SPECFORGE_LOG_FILTER",
        "SPECFORGE_LOG_JSON",
    ];

    fn clear_env() {
        for var in OVERRIDE_VARS {
            std::env::remove_var(var);
        }
    }

    fn temp_config(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        for (value, expected) in
            [("1", true), ("TRUE", true), ("yes", true), ("on", true), ("0", false), ("off", false)]
        {
            std::env::set_var("SPECFORGE_TEST_BOOL", value);
            assert_eq!(env_bool("SPECFORGE_TEST_BOOL"), Some(expected), "value {value}");
        }

        std::env::remove_var("SPECFORGE_TEST_BOOL");
        assert_eq!(env_bool("SPECFORGE_TEST_BOOL"), None);
    }

    #[test]
    fn test_load_from_env_applies_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("SPECFORGE_REDIS_URL", "redis://cache:6380");
        std::env::set_var("SPECFORGE_RATE_LIMIT_RPM", "120");
        std::env::set_var("SPECFORGE_RATE_LIMIT_BURST", "10");
        std::env::set_var("SPECFORGE_LOCK_TTL_MS", "45000");
        std::env::set_var("SPECFORGE_LOG_FILTER", "specforge=debug");
        std::env::set_var("SPECFORGE_LOG_JSON", "true");

        let config = load_from_env();
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.coordination.redis_url, "redis://cache:6380");
        assert_eq!(config.rate_limiter.requests_per_minute, 120);
        assert_eq!(config.rate_limiter.burst_factor, 10);
        assert_eq!(config.lock.ttl_ms, 45_000);
        assert_eq!(config.telemetry.filter, "specforge=debug");
        assert!(config.telemetry.json);
    }

    #[test]
    fn test_load_from_env_defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        assert_eq!(load_from_env().unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_env_invalid_number() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("SPECFORGE_RATE_LIMIT_RPM", "lots");
        let result = load_from_env();
        clear_env();

        match result {
            Err(SpecForgeError::Config(message)) => {
                assert!(message.contains("SPECFORGE_RATE_LIMIT_RPM"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_override_that_breaks_validation_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("SPECFORGE_RATE_LIMIT_BURST", "0");
        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(SpecForgeError::Config(_))));
    }

    #[test]
    fn test_load_uses_explicit_path_and_env() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let file = temp_config(".toml", "[rate_limiter]\nrequests_per_minute = 30\n");
        std::env::set_var("SPECFORGE_CONFIG", file.path());
        std::env::set_var("SPECFORGE_RATE_LIMIT_BURST", "2");

        let config = load();
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.rate_limiter.requests_per_minute, 30);
        assert_eq!(config.rate_limiter.burst_factor, 2);
    }

    #[test]
    fn test_load_from_file_toml() {
        let file = temp_config(
            ".toml",
            r#"
[tiers]
default_tier = "free"

[tiers.limits]
free = 2
pro = 5

[lock]
ttl_ms = 9000
heartbeat_interval_ms = 3000
"#,
        );

        let config = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.tiers.limits.get("free"), Some(&2));
        assert_eq!(config.lock.ttl_ms, 9_000);
        assert_eq!(config.lock.heartbeat_interval_ms, Some(3_000));
    }

    #[test]
    fn test_load_from_file_json() {
        let file = temp_config(".json", r#"{ "fairness": { "base_snooze_ms": 5000 } }"#);

        let config = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.fairness.base_snooze_ms, 5_000);
        assert_eq!(config.rate_limiter, Config::default().rate_limiter);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_config() {
        let file = temp_config(
            ".toml",
            "[lock]\nttl_ms = 1000\nheartbeat_interval_ms = 1000\noperation_timeout_ms = 200\n",
        );

        let err = load_from_file(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, SpecForgeError::Config(m) if m.contains("heartbeat")));
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/specforge.toml")));
        assert!(matches!(result, Err(SpecForgeError::Config(_))));
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let file = temp_config(".json", r#"{ "this is": "not valid json" "#);

        let result = load_from_file(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(SpecForgeError::Config(_))));
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("some content", Path::new("specforge.yaml"));
        assert!(matches!(result, Err(SpecForgeError::Config(m)) if m.contains("yaml")));
    }
}
