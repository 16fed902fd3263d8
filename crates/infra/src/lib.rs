//! # SpecForge Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - Coordination store adapters (Redis, in-memory)
//! - Cron-driven singleton scheduling
//! - Configuration loading
//! - Tracing subscriber setup
//!
//! ## Architecture
//! - Implements traits defined in `specforge-core`
//! - Depends on `specforge-common`, `specforge-domain`, and `specforge-core`
//! - Contains all "impure" code (network, files, global subscribers)

pub mod config;
pub mod coordination;
pub mod errors;
pub mod scheduling;
pub mod telemetry;

// Re-export commonly used items
pub use coordination::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use coordination::RedisCoordinationStore;
pub use errors::InfraError;
pub use scheduling::{
    ScheduledJob, SchedulerError, SchedulerResult, SingletonRunStats, SingletonScheduler,
    SingletonSchedulerConfig,
};
pub use telemetry::init_tracing;
