//! In-process coordination store for lock unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use specforge_domain::{Result, SpecForgeError};

use super::ports::CoordinationStore;

/// Store without expiry; `evict` simulates a TTL lapse.
#[derive(Default)]
pub(crate) struct TestStore {
    entries: Mutex<HashMap<String, String>>,
    pub(crate) fail: AtomicBool,
    pub(crate) hang: AtomicBool,
    /// Apply creates, then stall before acknowledging them
    pub(crate) slow_ack: AtomicBool,
    /// Fail extends only
    pub(crate) fail_extend: AtomicBool,
}

impl TestStore {
    pub(crate) fn evict(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub(crate) fn owner(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    async fn gate(&self) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SpecForgeError::Coordination("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for TestStore {
    async fn try_create(&self, key: &str, token: &str, _ttl: Duration) -> Result<bool> {
        self.gate().await?;
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), token.to_string());
        }
        if self.slow_ack.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(true)
    }

    async fn extend_if(&self, key: &str, token: &str, _ttl: Duration) -> Result<bool> {
        self.gate().await?;
        if self.fail_extend.load(Ordering::SeqCst) {
            return Err(SpecForgeError::Coordination("extend timed out upstream".into()));
        }
        Ok(self.entries.lock().get(key).map(String::as_str) == Some(token))
    }

    async fn delete_if(&self, key: &str, token: &str) -> Result<bool> {
        self.gate().await?;
        let mut entries = self.entries.lock();
        if entries.get(key).map(String::as_str) == Some(token) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

