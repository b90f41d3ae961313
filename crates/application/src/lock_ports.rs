//! Lock storage quorum port.

use std::time::Duration;

use async_trait::async_trait;
use lockwarden_core::AppResult;
use lockwarden_domain::LockKey;

/// One independent key-value node of the lock storage quorum.
///
/// Every operation covers all `keys` atomically on this node. An `Err`
/// result means the node could not be reached and counts against the
/// quorum; `Ok(false)` means the node answered but refused.
#[async_trait]
pub trait LockStorageNode: Send + Sync {
    /// Node name used in logs.
    fn name(&self) -> &str;

    /// Stores `token` under every key with expiry `ttl` when none of the keys exists.
    async fn set_if_absent(&self, keys: &[LockKey], token: &str, ttl: Duration)
    -> AppResult<bool>;

    /// Resets the expiry of every key when all of them store `token`.
    async fn extend_if_owned(
        &self,
        keys: &[LockKey],
        token: &str,
        ttl: Duration,
    ) -> AppResult<bool>;

    /// Deletes each key still storing `token` and returns how many were deleted.
    async fn delete_if_owned(&self, keys: &[LockKey], token: &str) -> AppResult<u64>;
}
