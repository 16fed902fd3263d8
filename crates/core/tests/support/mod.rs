//! Shared test helpers for `specforge-core` integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use specforge_core::CoordinationStore;
use specforge_domain::{Result as DomainResult, SpecForgeError};
use tokio::time::Instant;

/// In-memory coordination store honouring TTLs.
///
/// Entries expire on the tokio clock, so tests can share one store between
/// several lock instances the way separate processes share Redis.
#[derive(Debug, Default)]
pub struct ExpiringStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl ExpiringStore {
    pub fn owner(&self, key: &str) -> Option<String> {
        Self::live_owner(&self.entries.lock(), key)
    }

    /// Drop a key as if its TTL had lapsed.
    pub fn expire(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn live_owner(entries: &HashMap<String, (String, Instant)>, key: &str) -> Option<String> {
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl CoordinationStore for ExpiringStore {
    async fn try_create(&self, key: &str, token: &str, ttl: Duration) -> DomainResult<bool> {
        let mut entries = self.entries.lock();
        if Self::live_owner(&entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (token.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn extend_if(&self, key: &str, token: &str, ttl: Duration) -> DomainResult<bool> {
        let mut entries = self.entries.lock();
        if Self::live_owner(&entries, key).as_deref() != Some(token) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (token.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete_if(&self, key: &str, token: &str) -> DomainResult<bool> {
        let mut entries = self.entries.lock();
        if Self::live_owner(&entries, key).as_deref() != Some(token) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }
}

/// View of a shared store whose extends always fail.
///
/// Models an owner that can no longer reach the store after acquiring.
#[derive(Debug)]
pub struct PartitionedExtends(pub Arc<ExpiringStore>);

#[async_trait]
impl CoordinationStore for PartitionedExtends {
    async fn try_create(&self, key: &str, token: &str, ttl: Duration) -> DomainResult<bool> {
        self.0.try_create(key, token, ttl).await
    }

    async fn extend_if(&self, _key: &str, _token: &str, _ttl: Duration) -> DomainResult<bool> {
        Err(SpecForgeError::Coordination("connection reset by peer".into()))
    }

    async fn delete_if(&self, key: &str, token: &str) -> DomainResult<bool> {
        self.0.delete_if(key, token).await
    }
}
