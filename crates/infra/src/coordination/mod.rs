//! Coordination store adapters for distributed locks
//!
//! - [`memory`]: in-process store with clock-driven expiry
//! - [`redis_store`]: shared Redis store with scripted compare-and-act
//!   operations (requires the `redis` feature)

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;
