//! Fairness admission at the job-queue boundary
//!
//! Each delivery is either run (holding a tenant slot for the duration of the
//! work) or deferred with a jittered snooze. Deferral is a scheduling signal,
//! not a failure, and is logged at debug only.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use specforge_domain::{FairnessConfig, JobId, SpecForgeError, TenantId, TierName};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::args::{ArgsExtractor, JobIdentity};
use super::limiter::PerUserLimiter;
use super::ports::TierResolver;

/// A job as delivered by the queue backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDelivery {
    /// Stable across redeliveries
    pub id: JobId,
    pub kind: String,
    /// Serialized job arguments
    pub args: Vec<u8>,
    /// Delivery attempt as counted by the backend
    pub attempt: u32,
    /// Times this job has already been deferred by fairness admission
    pub deferrals: u32,
}

/// What the queue backend should do with the delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// The work ran and succeeded
    Completed,
    /// Redeliver after the given delay without counting a failure
    Snooze(Duration),
}

/// Errors returned by [`FairnessMiddleware::handle`]
#[derive(Debug, Error)]
pub enum FairnessError<E> {
    /// The job was deferred too many times and is handed back as failed
    #[error("job {job_id} for tenant {tenant_id} deferred {deferrals} times, giving up")]
    DeferralLimitExceeded { tenant_id: TenantId, job_id: JobId, deferrals: u32 },

    /// The inner work failed
    #[error("job failed: {0}")]
    Job(#[source] E),
}

impl<E> FairnessError<E> {
    /// The inner work error, if the work ran
    pub fn into_job_error(self) -> Option<E> {
        match self {
            Self::Job(error) => Some(error),
            Self::DeferralLimitExceeded { .. } => None,
        }
    }
}

impl<E: std::fmt::Display> From<FairnessError<E>> for SpecForgeError {
    fn from(error: FairnessError<E>) -> Self {
        match error {
            FairnessError::DeferralLimitExceeded { .. } => {
                SpecForgeError::Internal(error.to_string())
            }
            FairnessError::Job(inner) => SpecForgeError::Internal(inner.to_string()),
        }
    }
}

/// Releases the tenant slot on every exit path, including unwinding and
/// cancellation of the surrounding future.
struct SlotGuard<'a> {
    limiter: &'a PerUserLimiter,
    tenant_id: &'a TenantId,
    job_id: JobId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.limiter.release(self.tenant_id, self.job_id);
        debug!(tenant_id = %self.tenant_id, job_id = %self.job_id, "fairness.released");
    }
}

/// Job-queue interceptor enforcing per-tenant concurrency ceilings
pub struct FairnessMiddleware {
    limiter: Arc<PerUserLimiter>,
    resolver: Arc<dyn TierResolver>,
    extractor: ArgsExtractor,
    base_snooze: Duration,
    jitter: Duration,
    max_deferrals: Option<u32>,
}

impl std::fmt::Debug for FairnessMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairnessMiddleware")
            .field("extractor", &self.extractor)
            .field("base_snooze", &self.base_snooze)
            .field("jitter", &self.jitter)
            .field("max_deferrals", &self.max_deferrals)
            .finish_non_exhaustive()
    }
}

impl FairnessMiddleware {
    pub fn new(
        limiter: Arc<PerUserLimiter>,
        resolver: Arc<dyn TierResolver>,
        config: &FairnessConfig,
    ) -> Self {
        Self {
            limiter,
            resolver,
            extractor: ArgsExtractor::new(config.max_args_bytes),
            base_snooze: config.base_snooze(),
            jitter: config.jitter(),
            max_deferrals: config.max_deferrals,
        }
    }

    pub fn limiter(&self) -> &Arc<PerUserLimiter> {
        &self.limiter
    }

    /// `base_snooze` plus a uniform random delay in `[0, jitter]`
    pub fn snooze_duration(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=jitter_ms) };
        self.base_snooze.saturating_add(Duration::from_millis(extra))
    }

    /// Admit or defer `delivery`, running `work` while holding a slot
    ///
    /// Deliveries without a tenant id bypass the limiter entirely.
    ///
    /// # Errors
    /// - `FairnessError::DeferralLimitExceeded` when the job would be
    ///   deferred again after reaching `max_deferrals`
    /// - `FairnessError::Job` when `work` fails
    #[instrument(skip_all, fields(job_id = %delivery.id, kind = %delivery.kind))]
    pub async fn handle<F, Fut, E>(
        &self,
        delivery: &JobDelivery,
        work: F,
    ) -> Result<JobDisposition, FairnessError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let Some(identity) = self.extractor.extract(&delivery.args) else {
            debug!("fairness.bypass");
            work().await.map_err(FairnessError::Job)?;
            return Ok(JobDisposition::Completed);
        };

        let tier = self.resolve_tier(&identity).await;
        let tenant_id = identity.tenant_id;

        if !self.limiter.try_acquire(&tenant_id, &tier, delivery.id) {
            if let Some(max) = self.max_deferrals {
                if delivery.deferrals >= max {
                    return Err(FairnessError::DeferralLimitExceeded {
                        tenant_id,
                        job_id: delivery.id,
                        deferrals: delivery.deferrals,
                    });
                }
            }

            let snooze = self.snooze_duration();
            debug!(
                %tenant_id,
                %tier,
                active = self.limiter.active_count(&tenant_id),
                ceiling = self.limiter.ceiling(&tier),
                snooze_ms = snooze.as_millis() as u64,
                "fairness.deferred"
            );
            return Ok(JobDisposition::Snooze(snooze));
        }

        let _slot = SlotGuard { limiter: &self.limiter, tenant_id: &tenant_id, job_id: delivery.id };
        debug!(%tenant_id, %tier, "fairness.admitted");

        work().await.map_err(FairnessError::Job)?;
        Ok(JobDisposition::Completed)
    }

    /// Tier from the job arguments, else the resolver, else the default tier
    async fn resolve_tier(&self, identity: &JobIdentity) -> TierName {
        if let Some(tier) = &identity.tier {
            return tier.clone();
        }

        let default_tier = self.limiter.limits().default_tier();
        match self.resolver.resolve_tier(&identity.tenant_id).await {
            Ok(Some(tier)) => tier,
            Ok(None) => default_tier.clone(),
            Err(error) => {
                warn!(
                    tenant_id = %identity.tenant_id,
                    error = %error,
                    "Tier resolution failed, using default tier"
                );
                default_tier.clone()
            }
        }
    }
}
