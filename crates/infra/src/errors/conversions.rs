//! Conversions from external infrastructure errors into domain errors.

use specforge_domain::SpecForgeError;
use thiserror::Error;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct InfraError(#[from] pub SpecForgeError);

impl From<InfraError> for SpecForgeError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

/* -------------------------------------------------------------------------- */
/* redis::RedisError → SpecForgeError */
/* -------------------------------------------------------------------------- */

#[cfg(feature = "redis")]
impl From<redis::RedisError> for InfraError {
    fn from(value: redis::RedisError) -> Self {
        use redis::ErrorKind;

        let error = match value.kind() {
            ErrorKind::InvalidClientConfig => {
                SpecForgeError::Coordination(format!("invalid redis configuration: {value}"))
            }
            ErrorKind::AuthenticationFailed => {
                SpecForgeError::Coordination("redis authentication failed".into())
            }
            ErrorKind::IoError => SpecForgeError::Coordination(format!("redis unreachable: {value}")),
            _ if value.is_timeout() => SpecForgeError::Coordination("redis timed out".into()),
            _ => SpecForgeError::Coordination(value.to_string()),
        };
        InfraError(error)
    }
}

/* -------------------------------------------------------------------------- */
/* config parsing and file errors → SpecForgeError */
/* -------------------------------------------------------------------------- */

impl From<toml::de::Error> for InfraError {
    fn from(value: toml::de::Error) -> Self {
        InfraError(SpecForgeError::Config(format!("Invalid TOML format: {value}")))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(SpecForgeError::Config(format!("Invalid JSON format: {value}")))
    }
}

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        let error = match value.kind() {
            std::io::ErrorKind::NotFound => SpecForgeError::NotFound(value.to_string()),
            _ => SpecForgeError::Config(format!("Failed to read config file: {value}")),
        };
        InfraError(error)
    }
}
