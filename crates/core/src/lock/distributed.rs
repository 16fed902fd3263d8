//! Cross-process mutual exclusion over a shared coordination store
//!
//! Each successful acquire writes a fresh random ownership token. Extend and
//! release are compare-and-act operations on that token, so an instance whose
//! lock expired can never refresh or delete a lock now held by someone else.
//!
//! Locally the lock also tracks its lease: the instant the store last confirmed
//! the key, counted from when that request was sent. Once `ttl` minus the
//! operation timeout has passed without a confirmation, the store may already
//! have expired the key and the lease is no longer trusted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use specforge_domain::{LockConfig, SpecForgeError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ports::CoordinationStore;

/// Errors returned by [`DistributedLock`] operations
#[derive(Debug, Error)]
pub enum LockError {
    /// This instance does not own the lock (never acquired, expired, or
    /// taken over by another instance)
    #[error("lock '{key}' is not held by this instance")]
    NotHeld { key: String },

    /// The coordination store failed; ownership is unknown
    #[error("coordination store error for lock '{key}': {source}")]
    Store {
        key: String,
        #[source]
        source: SpecForgeError,
    },

    /// The store did not answer within the operation timeout
    #[error("coordination store operation on lock '{key}' timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    /// The caller cancelled the operation
    #[error("operation on lock '{key}' cancelled")]
    Cancelled { key: String },

    #[error("invalid lock configuration: {message}")]
    InvalidConfig { message: String },
}

impl LockError {
    /// Whether the protected work must stop because ownership is gone
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, Self::NotHeld { .. })
    }
}

impl From<LockError> for SpecForgeError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Store { source, .. } => source,
            LockError::InvalidConfig { message } => SpecForgeError::Config(message),
            other => SpecForgeError::Coordination(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct Lease {
    token: String,
    confirmed_at: Instant,
}

/// Distributed lock on a single key
///
/// The token is remembered locally only after the store confirms the create,
/// so a cancelled or timed-out acquire never leaves this instance believing
/// it holds the lock.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    ttl: Duration,
    operation_timeout: Duration,
    lease: Mutex<Option<Lease>>,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("operation_timeout", &self.operation_timeout)
            .field("held", &self.is_held())
            .finish()
    }
}

impl DistributedLock {
    /// Create a lock on `key`
    ///
    /// # Errors
    /// Returns `LockError::InvalidConfig` if `ttl` or `operation_timeout` is
    /// zero, or if `operation_timeout` is not shorter than `ttl`.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
        ttl: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, LockError> {
        if ttl.is_zero() {
            return Err(LockError::InvalidConfig { message: "ttl must be greater than 0".into() });
        }
        if operation_timeout.is_zero() {
            return Err(LockError::InvalidConfig {
                message: "operation_timeout must be greater than 0".into(),
            });
        }
        if operation_timeout >= ttl {
            return Err(LockError::InvalidConfig {
                message: format!(
                    "operation_timeout {operation_timeout:?} must be less than the ttl {ttl:?}"
                ),
            });
        }

        Ok(Self { store, key: key.into(), ttl, operation_timeout, lease: Mutex::new(None) })
    }

    /// Create a lock named `name` using the configured prefix and timings
    pub fn from_config(
        store: Arc<dyn CoordinationStore>,
        config: &LockConfig,
        name: &str,
    ) -> Result<Self, LockError> {
        Self::new(store, config.key_for(name), config.ttl(), config.operation_timeout())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Whether this instance believes it holds the lock
    pub fn is_held(&self) -> bool {
        self.lease.lock().is_some()
    }

    /// Check that `interval` can keep this lock alive
    ///
    /// # Errors
    /// Returns `LockError::InvalidConfig` unless `0 < interval < ttl`.
    pub fn check_heartbeat_interval(&self, interval: Duration) -> Result<(), LockError> {
        if interval.is_zero() || interval >= self.ttl {
            return Err(LockError::InvalidConfig {
                message: format!(
                    "heartbeat interval {interval:?} must be greater than 0 and less than the \
                     ttl {:?}",
                    self.ttl
                ),
            });
        }
        Ok(())
    }

    /// Instant after which the current lease is no longer trusted
    ///
    /// `None` when no lease is held.
    pub fn lease_deadline(&self) -> Option<Instant> {
        self.lease.lock().as_ref().map(|lease| lease.confirmed_at + self.trusted_lease())
    }

    /// Drop the lease if its deadline has passed
    ///
    /// Returns true when the lease was dropped; the caller must treat the
    /// lock as lost.
    pub fn expire_stale_lease(&self) -> bool {
        let mut lease = self.lease.lock();
        let stale = lease
            .as_ref()
            .is_some_and(|l| Instant::now() >= l.confirmed_at + self.trusted_lease());
        if stale {
            *lease = None;
            warn!(lock_key = %self.key, "distributed_lock.lease_expired");
        }
        stale
    }

    fn trusted_lease(&self) -> Duration {
        self.ttl.saturating_sub(self.operation_timeout)
    }

    /// Try to take the lock
    ///
    /// Returns `Ok(false)` when another instance holds it. If this instance
    /// already holds it, the TTL is refreshed instead.
    #[instrument(skip_all, fields(lock_key = %self.key))]
    pub async fn try_acquire(&self, cancel: &CancellationToken) -> Result<bool, LockError> {
        if self.is_held() {
            match self.extend(cancel).await {
                Ok(()) => return Ok(true),
                Err(error) if error.is_ownership_lost() => {}
                Err(error) => return Err(error),
            }
        }

        let token = Uuid::new_v4().simple().to_string();
        let sent_at = Instant::now();
        let create = self.store.try_create(&self.key, &token, self.ttl);
        let created = match self.run(cancel, create).await {
            Ok(created) => created,
            Err(error @ (LockError::Timeout { .. } | LockError::Cancelled { .. })) => {
                self.discard_unconfirmed(&token).await;
                return Err(error);
            }
            Err(error) => return Err(error),
        };

        if created {
            *self.lease.lock() = Some(Lease { token, confirmed_at: sent_at });
            info!(ttl_ms = self.ttl.as_millis() as u64, "distributed_lock.acquired");
        } else {
            debug!("distributed_lock.contended");
        }
        Ok(created)
    }

    /// Refresh the TTL if this instance still owns the lock
    ///
    /// # Errors
    /// `LockError::NotHeld` means the lock is lost and protected work must
    /// stop. Other errors leave ownership unknown.
    pub async fn extend(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        let token = self.current_token()?;
        let sent_at = Instant::now();
        let extended =
            self.run(cancel, self.store.extend_if(&self.key, &token, self.ttl)).await?;

        if extended {
            if let Some(lease) = self.lease.lock().as_mut().filter(|l| l.token == token) {
                lease.confirmed_at = sent_at;
            }
            debug!(lock_key = %self.key, "distributed_lock.extended");
            Ok(())
        } else {
            self.forget(&token);
            warn!(lock_key = %self.key, "distributed_lock.lost");
            Err(self.not_held())
        }
    }

    /// Release the lock if this instance owns it
    ///
    /// A no-op when no token is held. Never deletes a lock owned by another
    /// instance.
    ///
    /// # Errors
    /// `LockError::NotHeld` if the lock expired or was taken over before the
    /// release.
    #[instrument(skip_all, fields(lock_key = %self.key))]
    pub async fn release(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        let Some(token) = self.lease.lock().as_ref().map(|l| l.token.clone()) else {
            return Ok(());
        };

        let deleted = self.run(cancel, self.store.delete_if(&self.key, &token)).await?;
        self.forget(&token);

        if deleted {
            info!("distributed_lock.released");
            Ok(())
        } else {
            warn!("distributed_lock.release_not_owner");
            Err(self.not_held())
        }
    }

    fn current_token(&self) -> Result<String, LockError> {
        self.lease.lock().as_ref().map(|l| l.token.clone()).ok_or_else(|| self.not_held())
    }

    /// Clear the local lease only if it still carries `token`
    fn forget(&self, token: &str) {
        let mut current = self.lease.lock();
        if current.as_ref().is_some_and(|l| l.token == token) {
            *current = None;
        }
    }

    /// Best-effort removal of a create whose reply never arrived
    ///
    /// The store may have applied the create anyway; without this the key
    /// would stay owned by nobody until its TTL lapses.
    async fn discard_unconfirmed(&self, token: &str) {
        let cleanup = self.store.delete_if(&self.key, token);
        match tokio::time::timeout(self.operation_timeout, cleanup).await {
            Ok(Ok(true)) => warn!(lock_key = %self.key, "distributed_lock.orphan_removed"),
            Ok(Ok(false)) => {}
            Ok(Err(error)) => {
                warn!(
                    lock_key = %self.key,
                    error = %error,
                    "distributed_lock.orphan_cleanup_failed"
                );
            }
            Err(_) => warn!(lock_key = %self.key, "distributed_lock.orphan_cleanup_timed_out"),
        }
    }

    fn not_held(&self) -> LockError {
        LockError::NotHeld { key: self.key.clone() }
    }

    /// Bound a store call by the operation timeout and the caller's token
    async fn run<T>(
        &self,
        cancel: &CancellationToken,
        operation: impl Future<Output = specforge_domain::Result<T>>,
    ) -> Result<T, LockError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LockError::Cancelled { key: self.key.clone() }),
            result = tokio::time::timeout(self.operation_timeout, operation) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(LockError::Store { key: self.key.clone(), source }),
                Err(_) => Err(LockError::Timeout {
                    key: self.key.clone(),
                    timeout: self.operation_timeout,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::super::test_support::TestStore;
    use super::*;

    fn lock_on(store: &Arc<TestStore>) -> DistributedLock {
        DistributedLock::new(
            Arc::clone(store) as Arc<dyn CoordinationStore>,
            "specforge:lock:refresh",
            Duration::from_secs(30),
            Duration::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let store: Arc<dyn CoordinationStore> = Arc::new(TestStore::default());
        let err = DistributedLock::new(store, "k", Duration::ZERO, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig { .. }));
    }

    #[test]
    fn test_operation_timeout_must_leave_lease_time() {
        let store: Arc<dyn CoordinationStore> = Arc::new(TestStore::default());
        let err = DistributedLock::new(
            store,
            "k",
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig { .. }));
    }

    /// Validates the two-instance race on one key.
    ///
    /// Assertions:
    /// - Exactly one instance acquires.
    /// - The loser's extend fails with `NotHeld` and its release is a no-op.
    /// - The winner's key survives the loser's calls.
    #[tokio::test]
    async fn test_two_instances_exactly_one_wins() {
        let store = Arc::new(TestStore::default());
        let first = lock_on(&store);
        let second = lock_on(&store);
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(first.try_acquire(&cancel), second.try_acquire(&cancel));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a ^ b, "exactly one instance must acquire");

        let (winner, loser) = if a { (&first, &second) } else { (&second, &first) };
        let owner = store.owner("specforge:lock:refresh").unwrap();

        assert!(loser.extend(&cancel).await.unwrap_err().is_ownership_lost());
        loser.release(&cancel).await.unwrap();
        assert_eq!(store.owner("specforge:lock:refresh"), Some(owner));

        winner.extend(&cancel).await.unwrap();
        winner.release(&cancel).await.unwrap();
        assert!(store.owner("specforge:lock:refresh").is_none());
    }

    #[tokio::test]
    async fn test_expired_holder_cannot_delete_new_owner() {
        let store = Arc::new(TestStore::default());
        let stale = lock_on(&store);
        let fresh = lock_on(&store);
        let cancel = CancellationToken::new();

        assert!(stale.try_acquire(&cancel).await.unwrap());
        store.evict("specforge:lock:refresh");
        assert!(fresh.try_acquire(&cancel).await.unwrap());

        let err = stale.release(&cancel).await.unwrap_err();
        assert!(err.is_ownership_lost());
        assert!(!stale.is_held());
        assert!(fresh.is_held());
        assert!(store.owner("specforge:lock:refresh").is_some());
    }

    #[tokio::test]
    async fn test_extend_after_expiry_reports_lost() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        let cancel = CancellationToken::new();

        assert!(lock.try_acquire(&cancel).await.unwrap());
        store.evict("specforge:lock:refresh");

        assert!(lock.extend(&cancel).await.unwrap_err().is_ownership_lost());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_reacquire_while_held_refreshes() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        let cancel = CancellationToken::new();

        assert!(lock.try_acquire(&cancel).await.unwrap());
        let owner = store.owner("specforge:lock:refresh");
        assert!(lock.try_acquire(&cancel).await.unwrap());
        assert_eq!(store.owner("specforge:lock:refresh"), owner);
    }

    #[tokio::test]
    async fn test_release_without_token_is_noop() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        lock.release(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_is_not_ownership_loss() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        let cancel = CancellationToken::new();
        assert!(lock.try_acquire(&cancel).await.unwrap());

        store.fail.store(true, Ordering::SeqCst);
        let err = lock.extend(&cancel).await.unwrap_err();

        assert!(matches!(err, LockError::Store { .. }));
        assert!(!err.is_ownership_lost());
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_hung_store_times_out_without_recording_token() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        store.hang.store(true, Ordering::SeqCst);

        let err = lock.try_acquire(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_leaves_no_token() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = lock.try_acquire(&cancel).await.unwrap_err();

        assert!(matches!(err, LockError::Cancelled { .. }));
        assert!(!lock.is_held());
        assert!(store.owner("specforge:lock:refresh").is_none());
    }

    /// Validates that a create applied by the store but never acknowledged
    /// does not leave an ownerless key behind.
    ///
    /// Assertions:
    /// - The acquire reports a timeout and records no lease.
    /// - The key written by the stalled create is removed.
    #[tokio::test]
    async fn test_unacknowledged_create_is_removed() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);
        store.slow_ack.store(true, Ordering::SeqCst);

        let err = lock.try_acquire(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(!lock.is_held());
        assert!(store.owner("specforge:lock:refresh").is_none());
    }

    #[tokio::test]
    async fn test_lease_goes_stale_without_confirmation() {
        let store = Arc::new(TestStore::default());
        let lock = DistributedLock::new(
            Arc::clone(&store) as Arc<dyn CoordinationStore>,
            "specforge:lock:lease",
            Duration::from_millis(300),
            Duration::from_millis(100),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        assert!(lock.try_acquire(&cancel).await.unwrap());

        let deadline = lock.lease_deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(200));
        assert!(!lock.expire_stale_lease());

        tokio::time::sleep(Duration::from_millis(120)).await;
        lock.extend(&cancel).await.unwrap();
        assert!(lock.lease_deadline().unwrap() > deadline);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(lock.expire_stale_lease());
        assert!(!lock.is_held());
        assert!(lock.lease_deadline().is_none());
    }

    #[test]
    fn test_heartbeat_interval_must_be_within_ttl() {
        let store = Arc::new(TestStore::default());
        let lock = lock_on(&store);

        assert!(lock.check_heartbeat_interval(Duration::from_secs(10)).is_ok());
        for bad in [Duration::ZERO, Duration::from_secs(30), Duration::from_secs(31)] {
            let err = lock.check_heartbeat_interval(bad).unwrap_err();
            assert!(matches!(err, LockError::InvalidConfig { .. }));
        }
    }
}
