//! Subscription tiers and their concurrency ceilings

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ENTERPRISE_CEILING, DEFAULT_FREE_CEILING, DEFAULT_PRO_CEILING, TIER_ENTERPRISE,
    TIER_FREE, TIER_PRO,
};
use crate::{Result, SpecForgeError};

/// Subscription tier name, normalized to trimmed lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TierName(String);

impl TierName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// The lowest tier
    pub fn free() -> Self {
        Self(TIER_FREE.to_string())
    }

    pub fn pro() -> Self {
        Self(TIER_PRO.to_string())
    }

    pub fn enterprise() -> Self {
        Self(TIER_ENTERPRISE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TierName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&str> for TierName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<TierName> for String {
    fn from(name: TierName) -> Self {
        name.0
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-tier concurrency ceilings
///
/// Every ceiling is positive and the default tier is always present, so
/// [`TierLimits::ceiling`] is total: unknown tiers get the default tier's
/// ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLimits {
    ceilings: BTreeMap<TierName, u32>,
    default_tier: TierName,
}

impl TierLimits {
    /// Build validated tier limits
    ///
    /// # Errors
    /// Returns `SpecForgeError::Validation` if a ceiling is zero or the
    /// default tier has no ceiling.
    pub fn new(
        ceilings: impl IntoIterator<Item = (TierName, u32)>,
        default_tier: TierName,
    ) -> Result<Self> {
        let ceilings: BTreeMap<TierName, u32> = ceilings.into_iter().collect();

        if let Some((tier, _)) = ceilings.iter().find(|(_, ceiling)| **ceiling == 0) {
            return Err(SpecForgeError::Validation(format!(
                "concurrency ceiling for tier '{tier}' must be greater than 0"
            )));
        }

        if !ceilings.contains_key(&default_tier) {
            return Err(SpecForgeError::Validation(format!(
                "default tier '{default_tier}' has no concurrency ceiling"
            )));
        }

        Ok(Self { ceilings, default_tier })
    }

    /// Ceiling for `tier`, falling back to the default tier
    pub fn ceiling(&self, tier: &TierName) -> u32 {
        self.ceilings
            .get(tier)
            .or_else(|| self.ceilings.get(&self.default_tier))
            .copied()
            .unwrap_or(DEFAULT_FREE_CEILING)
    }

    /// Whether `tier` has its own configured ceiling
    pub fn is_known(&self, tier: &TierName) -> bool {
        self.ceilings.contains_key(tier)
    }

    /// Tier used for unknown or unresolvable tiers
    pub fn default_tier(&self) -> &TierName {
        &self.default_tier
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TierName, u32)> {
        self.ceilings.iter().map(|(tier, ceiling)| (tier, *ceiling))
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        let ceilings = [
            (TierName::free(), DEFAULT_FREE_CEILING),
            (TierName::pro(), DEFAULT_PRO_CEILING),
            (TierName::enterprise(), DEFAULT_ENTERPRISE_CEILING),
        ];
        Self { ceilings: ceilings.into_iter().collect(), default_tier: TierName::free() }
    }
}
