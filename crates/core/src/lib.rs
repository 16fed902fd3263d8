//! # SpecForge Core
//!
//! Governance logic for background jobs and provider calls.
//!
//! This crate contains:
//! - Per-tenant fairness admission for job deliveries
//! - Distributed locking for singleton scheduled work
//! - Guarded provider calls for the generation pipeline
//! - Port interfaces (traits) for tier lookup, coordination, and providers
//!
//! ## Architecture Principles
//! - Depends only on `specforge-common` and `specforge-domain`
//! - No Redis, HTTP, or scheduler code
//! - All external systems via traits

pub mod fairness;
pub mod lock;
pub mod pipeline;

pub use fairness::{
    ArgsExtractor, FairnessError, FairnessMiddleware, JobDelivery, JobDisposition, JobIdentity,
    PerUserLimiter, StaticTierResolver, TenantSlotSnapshot, TierResolver,
};
pub use lock::{
    run_exclusive, CoordinationStore, DistributedLock, ExclusiveOutcome, LockError, LockHeartbeat,
};
pub use pipeline::{PhaseGuards, PipelineCaller, PipelineError, ProviderClient, ProviderError};
