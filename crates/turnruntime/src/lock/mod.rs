//! Crash-durable, multi-process turn locks.

mod gate;
mod sqlite;
mod store;

pub use gate::{ExclusiveOptions, LockGuard, TurnGate};
pub use sqlite::SqliteLockStore;
pub use store::{LockRecord, LockStore, MemoryLockStore};
