//! Per-tenant concurrency accounting
//!
//! Slots are keyed by (tenant, job) so redelivery of a job that already holds
//! a slot is admitted without taking a second one, and releasing twice is a
//! no-op. A tenant's entry exists only while it has at least one active job.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::Serialize;
use specforge_domain::{JobId, TenantId, TierLimits, TierName};
use tracing::trace;

/// Active jobs of one tenant; the active count is the set size
#[derive(Debug, Default)]
struct TenantSlot {
    active_jobs: HashSet<JobId>,
}

/// Point-in-time view of a tenant's slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantSlotSnapshot {
    pub tenant_id: TenantId,
    pub active_count: usize,
    /// Sorted ascending
    pub active_jobs: Vec<JobId>,
}

/// In-memory per-tenant concurrency limiter
///
/// All operations go through one mutex; the check-then-insert in
/// [`PerUserLimiter::try_acquire`] is a single critical section.
#[derive(Debug)]
pub struct PerUserLimiter {
    limits: TierLimits,
    slots: Mutex<HashMap<TenantId, TenantSlot>>,
}

impl PerUserLimiter {
    pub fn new(limits: TierLimits) -> Self {
        Self { limits, slots: Mutex::new(HashMap::new()) }
    }

    pub fn limits(&self) -> &TierLimits {
        &self.limits
    }

    /// Ceiling for `tier`; unknown tiers get the default tier's ceiling
    pub fn ceiling(&self, tier: &TierName) -> usize {
        self.limits.ceiling(tier) as usize
    }

    /// Admit `job_id` for `tenant_id` if the tier's ceiling allows it
    ///
    /// Returns true without changing the count when the job already holds a
    /// slot. Returns false, leaving state untouched, when the tenant is at
    /// its ceiling.
    pub fn try_acquire(&self, tenant_id: &TenantId, tier: &TierName, job_id: JobId) -> bool {
        let ceiling = self.ceiling(tier);
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get_mut(tenant_id) {
            if slot.active_jobs.contains(&job_id) {
                trace!(%tenant_id, %job_id, "Job already holds a slot");
                return true;
            }
            if slot.active_jobs.len() >= ceiling {
                return false;
            }
            slot.active_jobs.insert(job_id);
            return true;
        }

        // ceiling is always >= 1, so a fresh tenant is always admitted
        let mut slot = TenantSlot::default();
        slot.active_jobs.insert(job_id);
        slots.insert(tenant_id.clone(), slot);
        true
    }

    /// Release the slot held by `job_id`
    ///
    /// Returns whether a slot was actually released. The tenant entry is
    /// removed once its last job is released.
    pub fn release(&self, tenant_id: &TenantId, job_id: JobId) -> bool {
        let mut slots = self.slots.lock();

        let Some(slot) = slots.get_mut(tenant_id) else {
            return false;
        };
        let released = slot.active_jobs.remove(&job_id);
        if slot.active_jobs.is_empty() {
            slots.remove(tenant_id);
        }
        released
    }

    /// Number of active jobs for `tenant_id`; 0 for unknown tenants
    pub fn active_count(&self, tenant_id: &TenantId) -> usize {
        self.slots.lock().get(tenant_id).map_or(0, |slot| slot.active_jobs.len())
    }

    /// Tenants currently holding at least one slot, sorted
    pub fn active_tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.slots.lock().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn snapshot(&self, tenant_id: &TenantId) -> Option<TenantSlotSnapshot> {
        let slots = self.slots.lock();
        let slot = slots.get(tenant_id)?;
        let mut active_jobs: Vec<JobId> = slot.active_jobs.iter().copied().collect();
        active_jobs.sort_unstable();
        Some(TenantSlotSnapshot {
            tenant_id: tenant_id.clone(),
            active_count: active_jobs.len(),
            active_jobs,
        })
    }
}
