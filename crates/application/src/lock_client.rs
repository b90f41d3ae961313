//! Quorum-based distributed lock client.
//!
//! A lock is granted when a strict majority of independent storage nodes
//! accept the same random token for the requested keys and the time spent
//! collecting those answers, plus a drift margin, still leaves some
//! validity on the lock. With `N` nodes every operation tolerates
//! `(N - 1) / 2` unreachable nodes.

mod config;
mod quorum;
mod record;
mod service;

#[cfg(test)]
mod tests;

pub use config::LockConfiguration;
pub use record::LockRecord;
pub use service::DistributedLockClient;
