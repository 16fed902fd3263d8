//! Lock heartbeat and exclusive execution
//!
//! A heartbeat task extends the lock on a fixed interval (strictly shorter
//! than the TTL) while protected work runs, and fires [`LockHeartbeat::lost`]
//! as soon as an extend reports that ownership is gone or the lease runs out
//! without a confirmed extend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::distributed::{DistributedLock, LockError};

/// Background task extending a held lock
#[derive(Debug)]
pub struct LockHeartbeat {
    stop: CancellationToken,
    lost: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LockHeartbeat {
    /// Start extending `lock` every `interval`
    ///
    /// The first extend happens one interval after spawning. Transient store
    /// errors are logged and retried on the next tick. If no extend is
    /// confirmed before the lease deadline, the lock is reported lost even
    /// while the store stays unreachable.
    ///
    /// # Errors
    /// Returns `LockError::InvalidConfig` unless `0 < interval < ttl`.
    pub fn spawn(lock: Arc<DistributedLock>, interval: Duration) -> Result<Self, LockError> {
        lock.check_heartbeat_interval(interval)?;
        Ok(Self::start(lock, interval))
    }

    fn start(lock: Arc<DistributedLock>, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();

        let handle = tokio::spawn(heartbeat_loop(lock, interval, stop.clone(), lost.clone()));

        Self { stop, lost, handle: Some(handle) }
    }

    /// Token cancelled when ownership is lost
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Stop the heartbeat and wait for the task to exit
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "lock_heartbeat.join_failed");
            }
        }
    }
}

impl Drop for LockHeartbeat {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn heartbeat_loop(
    lock: Arc<DistributedLock>,
    interval: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
            () = sleep_until(lock.lease_deadline()) => {
                if report_if_expired(&lock, &lost) {
                    break;
                }
                continue;
            }
        }

        let result = tokio::select! {
            result = lock.extend(&stop) => result,
            () = sleep_until(lock.lease_deadline()) => {
                if report_if_expired(&lock, &lost) {
                    break;
                }
                continue;
            }
        };

        match result {
            Ok(()) => {}
            Err(error) if error.is_ownership_lost() => {
                warn!(lock_key = %lock.key(), "lock_heartbeat.ownership_lost");
                lost.cancel();
                break;
            }
            Err(LockError::Cancelled { .. }) => break,
            Err(error) => {
                warn!(lock_key = %lock.key(), error = %error, "lock_heartbeat.extend_failed");
                if report_if_expired(&lock, &lost) {
                    break;
                }
            }
        }
    }

    debug!(lock_key = %lock.key(), "lock_heartbeat.stopped");
}

fn report_if_expired(lock: &DistributedLock, lost: &CancellationToken) -> bool {
    let expired = lock.expire_stale_lease();
    if expired {
        lost.cancel();
    }
    expired
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Result of [`run_exclusive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusiveOutcome<T> {
    /// The lock was held for the whole run and the work finished
    Completed(T),
    /// Another instance holds the lock; the work did not run
    Skipped,
    /// Ownership was lost mid-run and the work was abandoned
    Lost,
    /// The caller cancelled mid-run; the work was abandoned and the lock
    /// released
    Cancelled,
}

/// Run `work` only on the instance that acquires `lock`
///
/// Acquires, starts a heartbeat, runs the work (dropping it if ownership is
/// lost or `cancel` fires), stops the heartbeat, then releases. The work
/// receives the heartbeat's lost token for cooperative early exit.
///
/// The release is bounded by the lock's operation timeout only, so a
/// cancelled caller still frees the key.
///
/// # Errors
/// Returns `LockError::InvalidConfig` unless `0 < heartbeat_interval < ttl`,
/// and acquire errors. Release failures are logged, since the TTL bounds how
/// long a stale lock survives.
#[instrument(skip_all, fields(lock_key = %lock.key()))]
pub async fn run_exclusive<F, Fut, T>(
    lock: Arc<DistributedLock>,
    heartbeat_interval: Duration,
    cancel: &CancellationToken,
    work: F,
) -> Result<ExclusiveOutcome<T>, LockError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    lock.check_heartbeat_interval(heartbeat_interval)?;

    if !lock.try_acquire(cancel).await? {
        debug!("exclusive.skipped");
        return Ok(ExclusiveOutcome::Skipped);
    }

    let heartbeat = LockHeartbeat::start(Arc::clone(&lock), heartbeat_interval);
    let lost = heartbeat.lost();

    let outcome = tokio::select! {
        biased;
        _ = lost.cancelled() => ExclusiveOutcome::Lost,
        _ = cancel.cancelled() => ExclusiveOutcome::Cancelled,
        value = work(lost.clone()) => ExclusiveOutcome::Completed(value),
    };

    heartbeat.stop().await;

    if matches!(outcome, ExclusiveOutcome::Lost) {
        warn!("exclusive.lost");
        return Ok(outcome);
    }

    match lock.release(&CancellationToken::new()).await {
        Err(error) => warn!(error = %error, "exclusive.release_failed"),
        Ok(()) if matches!(outcome, ExclusiveOutcome::Cancelled) => info!("exclusive.cancelled"),
        Ok(()) => info!("exclusive.completed"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::super::ports::CoordinationStore;
    use super::super::test_support::TestStore;
    use super::*;

    const KEY: &str = "specforge:lock:sweep";

    fn lock_on(store: &Arc<TestStore>) -> Arc<DistributedLock> {
        Arc::new(
            DistributedLock::new(
                Arc::clone(store) as Arc<dyn CoordinationStore>,
                KEY,
                Duration::from_millis(300),
                Duration::from_millis(100),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_lock_while_owned() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        assert!(lock.try_acquire(&CancellationToken::new()).await.unwrap());

        let heartbeat = LockHeartbeat::spawn(Arc::clone(&lock), Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!heartbeat.is_lost());
        assert!(lock.is_held());
        heartbeat.stop().await;
    }

    /// Validates that losing the key mid-run fires the lost token.
    ///
    /// Assertions:
    /// - `lost()` is cancelled within a few intervals of the eviction.
    /// - The lock no longer reports itself as held.
    #[tokio::test]
    async fn test_heartbeat_signals_ownership_loss() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        assert!(lock.try_acquire(&CancellationToken::new()).await.unwrap());

        let heartbeat = LockHeartbeat::spawn(Arc::clone(&lock), Duration::from_millis(10)).unwrap();
        store.evict(KEY);

        tokio::time::timeout(Duration::from_secs(1), heartbeat.lost().cancelled())
            .await
            .expect("heartbeat should report loss");
        assert!(!lock.is_held());
        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn test_run_exclusive_completes_and_releases() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);

        let outcome = run_exclusive(
            Arc::clone(&lock),
            Duration::from_millis(10),
            &CancellationToken::new(),
            |_lost| async { 7 },
        )
        .await
        .unwrap();

        assert_eq!(outcome, ExclusiveOutcome::Completed(7));
        assert!(store.owner(KEY).is_none());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_run_exclusive_skips_when_held_elsewhere() {
        let store = Arc::new(TestStore::default());
        let holder = lock_on(&store);
        let contender = lock_on(&store);
        let cancel = CancellationToken::new();
        assert!(holder.try_acquire(&cancel).await.unwrap());

        let ran = AtomicBool::new(false);
        let outcome = run_exclusive(contender, Duration::from_millis(10), &cancel, |_lost| async {
            ran.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(outcome, ExclusiveOutcome::Skipped);
        assert!(!ran.load(Ordering::SeqCst));
        assert!(holder.is_held());
    }

    #[tokio::test]
    async fn test_run_exclusive_abandons_work_on_loss() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        let evictor = Arc::clone(&store);

        let outcome = run_exclusive(
            Arc::clone(&lock),
            Duration::from_millis(10),
            &CancellationToken::new(),
            |_lost| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                evictor.evict(KEY);
                tokio::time::sleep(Duration::from_secs(10)).await;
                "finished"
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, ExclusiveOutcome::Lost);
        assert!(store.owner(KEY).is_none());
    }

    #[tokio::test]
    async fn test_acquire_error_propagates() {
        let store = Arc::new(TestStore::default());
        store.fail.store(true, Ordering::SeqCst);

        let err = run_exclusive(
            lock_on(&store),
            Duration::from_millis(10),
            &CancellationToken::new(),
            |_lost| async {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LockError::Store { .. }));
    }

    /// Validates that an unreachable store cannot keep a lease alive.
    ///
    /// Assertions:
    /// - Every extend fails with a store error, never `NotHeld`.
    /// - `lost()` still fires once the lease deadline passes.
    /// - The lock no longer reports itself as held.
    #[tokio::test]
    async fn test_persistent_extend_errors_report_loss() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        assert!(lock.try_acquire(&CancellationToken::new()).await.unwrap());
        store.fail_extend.store(true, Ordering::SeqCst);

        let heartbeat = LockHeartbeat::spawn(Arc::clone(&lock), Duration::from_millis(30)).unwrap();

        tokio::time::timeout(Duration::from_secs(1), heartbeat.lost().cancelled())
            .await
            .expect("lease deadline should report loss");
        assert!(!lock.is_held());
        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn test_run_exclusive_loses_lock_when_store_unreachable() {
        let store = Arc::new(TestStore::default());
        store.fail_extend.store(true, Ordering::SeqCst);
        let lock = lock_on(&store);

        let started = tokio::time::Instant::now();
        let outcome = run_exclusive(
            Arc::clone(&lock),
            Duration::from_millis(30),
            &CancellationToken::new(),
            |_lost| tokio::time::sleep(Duration::from_secs(10)),
        )
        .await
        .unwrap();

        assert_eq!(outcome, ExclusiveOutcome::Lost);
        assert!(started.elapsed() < lock.ttl(), "work must stop before the key can expire");
    }

    #[tokio::test]
    async fn test_invalid_interval_is_rejected_before_acquire() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);

        for interval in [Duration::ZERO, lock.ttl()] {
            let err = run_exclusive(
                Arc::clone(&lock),
                interval,
                &CancellationToken::new(),
                |_lost| async {},
            )
            .await
            .unwrap_err();
            assert!(matches!(err, LockError::InvalidConfig { .. }));
        }
        assert!(store.owner(KEY).is_none());
        assert!(LockHeartbeat::spawn(lock, Duration::ZERO).is_err());
    }

    /// Validates that caller cancellation stops the work and frees the key.
    ///
    /// Assertions:
    /// - The outcome is `Cancelled` well before the work would finish.
    /// - The key is deleted even though the caller's token has fired.
    #[tokio::test]
    async fn test_cancel_abandons_work_and_releases() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = run_exclusive(Arc::clone(&lock), Duration::from_millis(10), &cancel, |_| {
            tokio::time::sleep(Duration::from_secs(10))
        })
        .await
        .unwrap();

        assert_eq!(outcome, ExclusiveOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(store.owner(KEY).is_none());
        assert!(!lock.is_held());
    }
}
