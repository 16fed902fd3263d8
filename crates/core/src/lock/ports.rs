//! Port interfaces for the shared coordination store
//!
//! Implementations must make each operation a single atomic step on the
//! store (scripted or transactional), never a read followed by a write.

use std::time::Duration;

use async_trait::async_trait;
use specforge_domain::Result;

/// Key-value store offering the conditional operations locks are built on
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `key -> token` with `ttl` only if `key` is absent
    ///
    /// Returns false when the key already exists.
    async fn try_create(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Reset the TTL of `key` only if it currently maps to `token`
    ///
    /// Returns false when the key is missing or owned by another token.
    async fn extend_if(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it currently maps to `token`
    ///
    /// Returns false when the key is missing or owned by another token.
    async fn delete_if(&self, key: &str, token: &str) -> Result<bool>;
}
