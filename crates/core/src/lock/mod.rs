//! Distributed locking for singleton scheduled work
//!
//! - [`distributed`]: token-owned lock over a [`CoordinationStore`]
//! - [`heartbeat`]: TTL extension while work runs, and [`run_exclusive`]
//! - [`ports`]: coordination store interface

pub mod distributed;
pub mod heartbeat;
pub mod ports;

#[cfg(test)]
mod test_support;

pub use distributed::{DistributedLock, LockError};
pub use heartbeat::{run_exclusive, ExclusiveOutcome, LockHeartbeat};
pub use ports::CoordinationStore;
