//! Port interfaces for the AI provider

use async_trait::async_trait;
use specforge_domain::{PipelinePhase, SpecForgeError};
use thiserror::Error;

/// Failures reported by a provider call or by parsing its response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network failure talking to the provider
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Provider asked us to slow down
    #[error("provider rate limited the request")]
    RateLimited,

    /// Provider reported a temporary outage
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Provider rejected the request; resending it will not help
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// The response did not parse or failed validation
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The caller cancelled before the request was sent
    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the failure is a temporary condition of the provider
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited | Self::Unavailable(_))
    }
}

impl From<ProviderError> for SpecForgeError {
    fn from(error: ProviderError) -> Self {
        SpecForgeError::Provider(error.to_string())
    }
}

/// Opaque client for the AI provider
///
/// Returns the raw response text; parsing belongs to the caller.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn call(&self, phase: PipelinePhase, prompt: &str) -> Result<String, ProviderError>;
}
