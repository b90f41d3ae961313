//! Application services and ports.

#![forbid(unsafe_code)]

mod lock_client;
mod lock_guard;
mod lock_ports;

pub use lock_client::{DistributedLockClient, LockConfiguration, LockRecord};
pub use lock_guard::{GuardOutcome, GuardedHandler, LockGuard, OperationContext};
pub use lock_ports::LockStorageNode;
