//! Guarded provider calls for one pipeline phase
//!
//! Every attempt waits for a rate-limiter token, calls the provider, and
//! parses the response. A malformed response fails only that attempt, so it
//! is retried; transient provider failures are retried too; anything else is
//! fatal. Cancellation by the caller is never held against the provider's
//! circuit breaker.

use std::fmt;
use std::sync::Arc;

use specforge_common::resilience::{OperationError, RetryError, RetryExecutor};
use specforge_domain::{PipelinePhase, SpecForgeError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::guards::PhaseGuards;
use super::ports::{ProviderClient, ProviderError};

/// A provider call that failed after the retry policy gave up
#[derive(Debug, Error)]
#[error("{phase} call failed: {source}")]
pub struct PipelineError {
    pub phase: PipelinePhase,
    #[source]
    pub source: RetryError<ProviderError>,
}

impl PipelineError {
    pub fn attempts(&self) -> u32 {
        self.source.attempts()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.source.is_circuit_open()
    }
}

impl From<PipelineError> for SpecForgeError {
    fn from(error: PipelineError) -> Self {
        SpecForgeError::Provider(error.to_string())
    }
}

/// Calls the provider through the guards of the requested phase
#[derive(Clone)]
pub struct PipelineCaller {
    client: Arc<dyn ProviderClient>,
    guards: Arc<PhaseGuards>,
    cancel: CancellationToken,
}

impl fmt::Debug for PipelineCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCaller").field("guards", &self.guards).finish_non_exhaustive()
    }
}

impl PipelineCaller {
    pub fn new(client: Arc<dyn ProviderClient>, guards: Arc<PhaseGuards>) -> Self {
        Self { client, guards, cancel: CancellationToken::new() }
    }

    /// Abort rate-limit waits and backoff sleeps when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn guards(&self) -> &Arc<PhaseGuards> {
        &self.guards
    }

    /// Call the provider for `phase` and parse the response
    ///
    /// # Errors
    /// Returns [`PipelineError`] carrying the attempt count when the circuit
    /// is open, a fatal error occurs, or all attempts are exhausted.
    #[instrument(skip(self, prompt, parse), fields(phase = %phase))]
    pub async fn call<T, P, PE>(
        &self,
        phase: PipelinePhase,
        prompt: &str,
        parse: P,
    ) -> Result<T, PipelineError>
    where
        P: Fn(&str) -> Result<T, PE>,
        PE: fmt::Display,
    {
        let executor = RetryExecutor::new(self.guards.retry_config(phase).clone())
            .with_circuit_breaker(Arc::new(self.guards.breaker(phase).clone()))
            .with_cancellation(self.cancel.clone());

        let limiter = self.guards.rate_limiter().get();
        let limiter = &limiter;
        let client = &self.client;
        let cancel = &self.cancel;
        let parse = &parse;

        let result = executor
            .execute(|| async move {
                limiter
                    .wait(cancel)
                    .await
                    .map_err(|_| OperationError::cancelled(ProviderError::Cancelled))?;

                let raw = client.call(phase, prompt).await.map_err(classify)?;

                parse(&raw).map_err(|e| {
                    OperationError::retryable(ProviderError::InvalidResponse(e.to_string()))
                })
            })
            .await;

        result.map_err(|source| {
            warn!(attempts = source.attempts(), error = %source, "pipeline.call_failed");
            PipelineError { phase, source }
        })
    }
}

fn classify(error: ProviderError) -> OperationError<ProviderError> {
    if matches!(error, ProviderError::Cancelled) {
        OperationError::cancelled(error)
    } else if error.is_transient() {
        OperationError::retryable(error)
    } else {
        OperationError::fatal(error)
    }
}
