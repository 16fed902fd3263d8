//! Tracing subscriber setup
//!
//! One global subscriber per process: an `EnvFilter` (from `RUST_LOG` when
//! set, otherwise the configured filter) and either a human-readable or a
//! JSON `fmt` layer.

use specforge_domain::{Result, SpecForgeError, TelemetryConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Build the filter, preferring `RUST_LOG` over the configured directives
///
/// # Errors
/// Returns `SpecForgeError::Config` if the configured filter does not parse.
pub fn build_env_filter(config: &TelemetryConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| {
        SpecForgeError::Config(format!("Invalid tracing filter '{}': {e}", config.filter))
    })
}

/// Install the global tracing subscriber
///
/// Returns `Ok(true)` when this call installed the subscriber and `Ok(false)`
/// when one was already installed, so repeated calls are harmless.
///
/// # Errors
/// Returns `SpecForgeError::Config` if the filter is invalid.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool> {
    let filter = build_env_filter(config)?;

    let layer = if config.json {
        fmt::layer().json().with_target(true).with_current_span(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let installed =
        tracing_subscriber::registry().with(layer.with_filter(filter)).try_init().is_ok();
    if installed {
        tracing::debug!(json = config.json, filter = %config.filter, "telemetry.initialized");
    }
    Ok(installed)
}
