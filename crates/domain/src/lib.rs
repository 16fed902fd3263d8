//! # SpecForge Domain
//!
//! Domain types for the job governance control plane.
//!
//! This crate contains:
//! - Tenant, job, tier, and pipeline phase types
//! - Domain error types and Result definitions
//! - Static configuration structures
//!
//! ## Architecture
//! - No dependencies on other SpecForge crates
//! - Pure data types with validation, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
