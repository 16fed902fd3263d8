//! Per-tenant fairness admission
//!
//! - [`args`]: size-bounded tenant/tier extraction from job arguments
//! - [`limiter`]: in-memory per-tenant concurrency accounting
//! - [`middleware`]: admit-or-snooze interceptor for job deliveries
//! - [`ports`]: tier resolution interface

pub mod args;
pub mod limiter;
pub mod middleware;
pub mod ports;

pub use args::{ArgsExtractor, JobIdentity};
pub use limiter::{PerUserLimiter, TenantSlotSnapshot};
pub use middleware::{FairnessError, FairnessMiddleware, JobDelivery, JobDisposition};
pub use ports::{StaticTierResolver, TierResolver};
