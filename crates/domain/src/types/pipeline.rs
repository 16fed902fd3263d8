//! AI pipeline phases
//!
//! Each phase calls the provider through its own circuit breaker and retry
//! policy. Classification is cheaper to retry than the generation phases.

use serde::{Deserialize, Serialize};

use crate::impl_domain_enum_conversions;

/// One phase of the multi-phase AI pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Classify detected files
    Classification,
    /// Convert classified sources into document sections
    Conversion,
    /// Place generated sections into the document outline
    Placement,
}

impl PipelinePhase {
    /// All phases in pipeline order
    pub const ALL: [PipelinePhase; 3] =
        [PipelinePhase::Classification, PipelinePhase::Conversion, PipelinePhase::Placement];
}

impl_domain_enum_conversions!(PipelinePhase {
    Classification => "classification",
    Conversion => "conversion",
    Placement => "placement",
});
