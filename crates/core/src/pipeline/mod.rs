//! Resilient provider calls for the generation pipeline
//!
//! - [`guards`]: per-phase circuit breakers and retry policies, shared rate limiter
//! - [`caller`]: rate-limited, retried, breaker-guarded provider calls
//! - [`ports`]: provider client interface

pub mod caller;
pub mod guards;
pub mod ports;

pub use caller::{PipelineCaller, PipelineError};
pub use guards::PhaseGuards;
pub use ports::{ProviderClient, ProviderError};
