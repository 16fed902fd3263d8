//! Port interfaces for tier resolution
//!
//! The middleware resolves a tenant's subscription tier through this trait
//! when the job arguments do not carry one.

use std::collections::HashMap;

use async_trait::async_trait;
use specforge_domain::{Result, TenantId, TierName};

/// Trait for looking up a tenant's subscription tier
#[async_trait]
pub trait TierResolver: Send + Sync {
    /// Resolve the tier of `tenant_id`
    ///
    /// Returns `Ok(None)` when the tenant has no subscription. Callers fall
    /// back to the default tier on `None` and on error.
    async fn resolve_tier(&self, tenant_id: &TenantId) -> Result<Option<TierName>>;
}

/// Resolver backed by a fixed tenant-to-tier map
#[derive(Debug, Clone, Default)]
pub struct StaticTierResolver {
    tiers: HashMap<TenantId, TierName>,
}

impl StaticTierResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant_id: TenantId, tier: TierName) -> Self {
        self.tiers.insert(tenant_id, tier);
        self
    }
}

#[async_trait]
impl TierResolver for StaticTierResolver {
    async fn resolve_tier(&self, tenant_id: &TenantId) -> Result<Option<TierName>> {
        Ok(self.tiers.get(tenant_id).cloned())
    }
}
