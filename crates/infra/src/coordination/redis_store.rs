//! Redis-backed coordination store
//!
//! Creation is a single `SET key token NX PX ttl`. Extension and deletion
//! compare the stored token and act inside one Lua script, so a key that
//! changed hands between the read and the write is never touched.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use specforge_core::CoordinationStore;
use specforge_domain::{Result, SpecForgeError};
use tracing::{debug, info, instrument};

use crate::errors::InfraError;

const EXTEND_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

const DELETE_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// [`CoordinationStore`] on a shared Redis instance
///
/// Cloning is cheap; clones share the multiplexed connection.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    connection: ConnectionManager,
    extend_script: Script,
    delete_script: Script,
}

impl std::fmt::Debug for RedisCoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCoordinationStore").finish_non_exhaustive()
    }
}

impl RedisCoordinationStore {
    /// Connect to `redis_url`
    ///
    /// The connection manager reconnects on its own after transient
    /// failures; callers bound each operation with their own deadline.
    ///
    /// # Errors
    /// Returns `SpecForgeError::Coordination` if the URL is invalid or the
    /// first connection fails.
    #[instrument(skip_all)]
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(InfraError::from)?;
        let connection = ConnectionManager::new(client).await.map_err(InfraError::from)?;
        info!("coordination.redis.connected");

        Ok(Self {
            connection,
            extend_script: Script::new(EXTEND_IF_OWNER),
            delete_script: Script::new(DELETE_IF_OWNER),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn redis_error(error: redis::RedisError) -> SpecForgeError {
    InfraError::from(error).into()
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn try_create(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut connection)
            .await
            .map_err(redis_error)?;

        let created = reply.is_some();
        debug!(key, created, "coordination.redis.set_nx");
        Ok(created)
    }

    async fn extend_if(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut connection = self.connection.clone();
        let extended: i64 = self
            .extend_script
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(redis_error)?;

        Ok(extended == 1)
    }

    async fn delete_if(&self, key: &str, token: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .delete_script
            .key(key)
            .arg(token)
            .invoke_async(&mut connection)
            .await
            .map_err(redis_error)?;

        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_is_sent_in_whole_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_coordination_error() {
        let err = RedisCoordinationStore::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, SpecForgeError::Coordination(_)));
    }
}
