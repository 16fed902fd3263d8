//! In-process coordination store
//!
//! Suitable for single-process deployments and for exercising locks without
//! a running Redis. Expiry is evaluated lazily against the injected clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use specforge_common::resilience::{Clock, SystemClock};
use specforge_core::CoordinationStore;
use specforge_domain::Result;
use tracing::trace;

#[derive(Debug, Clone)]
struct Entry {
    token: String,
    expires_at: Instant,
}

/// [`CoordinationStore`] backed by a mutex-guarded map
#[derive(Debug)]
pub struct InMemoryCoordinationStore<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, Entry>>,
    clock: C,
}

impl InMemoryCoordinationStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryCoordinationStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryCoordinationStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Current owner token of `key`, if the key is live
    pub fn owner(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        self.entries.lock().get(key).filter(|e| e.expires_at > now).map(|e| e.token.clone())
    }

    /// Remaining time to live of `key`
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .and_then(|e| e.expires_at.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Run `f` on the live entry for `key`, clearing it first if expired
    fn with_live<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
    ) -> T {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            trace!(key, "coordination.memory.expired");
            entries.remove(key);
        }
        f(&mut entries, now)
    }
}

#[async_trait]
impl<C: Clock> CoordinationStore for InMemoryCoordinationStore<C> {
    async fn try_create(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_live(key, |entries, now| {
            if entries.contains_key(key) {
                return false;
            }
            let entry = Entry { token: token.to_string(), expires_at: now + ttl };
            entries.insert(key.to_string(), entry);
            true
        }))
    }

    async fn extend_if(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_live(key, |entries, now| match entries.get_mut(key) {
            Some(entry) if entry.token == token => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        }))
    }

    async fn delete_if(&self, key: &str, token: &str) -> Result<bool> {
        Ok(self.with_live(key, |entries, _| {
            if entries.get(key).is_some_and(|e| e.token == token) {
                entries.remove(key);
                return true;
            }
            false
        }))
    }
}
