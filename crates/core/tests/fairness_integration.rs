//! Integration tests for fairness admission at the job-queue boundary.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use specforge_core::{
    FairnessError, FairnessMiddleware, JobDelivery, JobDisposition, PerUserLimiter,
    StaticTierResolver,
};
use specforge_domain::{FairnessConfig, JobId, SpecForgeError, TenantId, TierLimits, TierName};
use tokio::sync::{oneshot, Barrier};

fn middleware(resolver: StaticTierResolver) -> Arc<FairnessMiddleware> {
    let config = FairnessConfig { base_snooze_ms: 50, jitter_ms: 10, ..FairnessConfig::default() };
    Arc::new(FairnessMiddleware::new(
        Arc::new(PerUserLimiter::new(TierLimits::default())),
        Arc::new(resolver),
        &config,
    ))
}

fn delivery(id: u64, tenant: &str) -> JobDelivery {
    JobDelivery {
        id: JobId(id),
        kind: "convert_repository".to_string(),
        args: format!(r#"{{"tenant_id": "{tenant}", "repo_id": {id}}}"#).into_bytes(),
        attempt: 1,
        deferrals: 0,
    }
}

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

/// Validates the Free tenant flow across real tasks.
///
/// Assertions:
/// - While job 1 runs, job 2 for the same Free tenant is snoozed.
/// - Another tenant is admitted meanwhile.
/// - Once job 1 finishes, job 2 is admitted.
#[tokio::test]
async fn test_free_tenant_waits_for_running_job() {
    let middleware = middleware(StaticTierResolver::new());
    let (started_tx, started_rx) = oneshot::channel();
    let (finish_tx, finish_rx) = oneshot::channel::<()>();

    let running = {
        let middleware = Arc::clone(&middleware);
        tokio::spawn(async move {
            middleware
                .handle(&delivery(1, "alice"), || async move {
                    started_tx.send(()).ok();
                    finish_rx.await.ok();
                    Ok::<_, SpecForgeError>(())
                })
                .await
        })
    };
    started_rx.await.unwrap();

    let second = middleware
        .handle(&delivery(2, "alice"), || async { Ok::<_, SpecForgeError>(()) })
        .await
        .unwrap();
    assert!(matches!(second, JobDisposition::Snooze(d) if d >= Duration::from_millis(50)));

    let other = middleware
        .handle(&delivery(3, "bob"), || async { Ok::<_, SpecForgeError>(()) })
        .await
        .unwrap();
    assert_eq!(other, JobDisposition::Completed);

    finish_tx.send(()).unwrap();
    assert_eq!(running.await.unwrap().unwrap(), JobDisposition::Completed);

    let retried = middleware
        .handle(&delivery(2, "alice"), || async { Ok::<_, SpecForgeError>(()) })
        .await
        .unwrap();
    assert_eq!(retried, JobDisposition::Completed);
    assert!(middleware.limiter().active_tenants().is_empty());
}

/// Validates that a Pro tenant never runs more than three jobs at once.
#[tokio::test]
async fn test_pro_tenant_concurrency_is_capped() {
    let resolver = StaticTierResolver::new().with_tenant(tenant("acme"), TierName::pro());
    let middleware = middleware(resolver);
    let barrier = Arc::new(Barrier::new(8));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (1..=8u64)
        .map(|id| {
            let middleware = Arc::clone(&middleware);
            let barrier = Arc::clone(&barrier);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                barrier.wait().await;
                middleware
                    .handle(&delivery(id, "acme"), || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, SpecForgeError>(())
                    })
                    .await
            })
        })
        .collect();

    let mut completed = 0;
    let mut snoozed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            JobDisposition::Completed => completed += 1,
            JobDisposition::Snooze(_) => snoozed += 1,
        }
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(completed, 3);
    assert_eq!(snoozed, 5);
    assert_eq!(middleware.limiter().active_count(&tenant("acme")), 0);
}

async fn crash() -> Result<(), SpecForgeError> {
    panic!("worker crashed")
}

#[tokio::test]
async fn test_panicking_job_releases_slot() {
    let middleware = middleware(StaticTierResolver::new());

    let result = AssertUnwindSafe(middleware.handle(&delivery(1, "alice"), crash))
        .catch_unwind()
        .await;

    assert!(result.is_err());
    assert_eq!(middleware.limiter().active_count(&tenant("alice")), 0);
}

#[tokio::test]
async fn test_dropped_job_future_releases_slot() {
    let middleware = middleware(StaticTierResolver::new());

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        middleware.handle(&delivery(1, "alice"), || async {
            std::future::pending::<()>().await;
            Ok::<_, SpecForgeError>(())
        }),
    )
    .await;

    assert!(timed_out.is_err());
    assert_eq!(middleware.limiter().active_count(&tenant("alice")), 0);
}

#[tokio::test]
async fn test_redelivered_job_does_not_double_count() {
    let middleware = middleware(StaticTierResolver::new());
    let user = tenant("alice");
    middleware.limiter().try_acquire(&user, &TierName::free(), JobId(1));

    let disposition = middleware
        .handle(&delivery(1, "alice"), || async { Ok::<_, SpecForgeError>(()) })
        .await
        .unwrap();

    assert_eq!(disposition, JobDisposition::Completed);
    assert_eq!(middleware.limiter().active_count(&user), 0);
}

#[tokio::test]
async fn test_deferral_limit_maps_to_domain_error() {
    let middleware = middleware(StaticTierResolver::new());
    middleware.limiter().try_acquire(&tenant("alice"), &TierName::free(), JobId(99));

    let mut job = delivery(1, "alice");
    job.deferrals = FairnessConfig::default().max_deferrals.unwrap();
    let err = middleware
        .handle(&job, || async { Ok::<_, SpecForgeError>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, FairnessError::DeferralLimitExceeded { .. }));
    assert!(matches!(
        SpecForgeError::from(err),
        SpecForgeError::Internal(m) if m.contains("alice")
    ));
}
