//! Scheduling infrastructure for singleton background work
//!
//! Cron-driven jobs that must run on exactly one instance per tick. Every
//! scheduler follows the same runtime rules:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Timeout wrapping on all async operations

pub mod error;
pub mod singleton_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use singleton_scheduler::{
    ScheduledJob, SingletonRunStats, SingletonScheduler, SingletonSchedulerConfig,
};
