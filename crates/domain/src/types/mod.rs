//! Domain types for job governance

pub mod ids;
pub mod pipeline;
pub mod tier;

pub use ids::{JobId, TenantId};
pub use pipeline::PipelinePhase;
pub use tier::{TierLimits, TierName};
