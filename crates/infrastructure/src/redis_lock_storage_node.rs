//! Redis-backed lock storage node.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lockwarden_application::LockStorageNode;
use lockwarden_core::{AppError, AppResult};
use lockwarden_domain::LockKey;
use redis::Script;

use crate::RedisConnectionSupervisor;

const ACQUIRE_LOCK_SCRIPT: &str = r#"
for _, key in ipairs(KEYS) do
  if redis.call('EXISTS', key) == 1 then
    return 0
  end
end
for _, key in ipairs(KEYS) do
  redis.call('SET', key, ARGV[1], 'PX', ARGV[2])
end
return 1
"#;

const EXTEND_LOCK_SCRIPT: &str = r#"
for _, key in ipairs(KEYS) do
  if redis.call('GET', key) ~= ARGV[1] then
    return 0
  end
end
for _, key in ipairs(KEYS) do
  redis.call('PEXPIRE', key, ARGV[2])
end
return 1
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
local deleted = 0
for _, key in ipairs(KEYS) do
  if redis.call('GET', key) == ARGV[1] then
    deleted = deleted + redis.call('DEL', key)
  end
end
return deleted
"#;

/// Redis implementation of one lock storage quorum node.
///
/// All keys of one request are checked and written inside a single Lua
/// script, so a node either grants the whole key set or none of it.
pub struct RedisLockStorageNode {
    supervisor: Arc<RedisConnectionSupervisor>,
    key_prefix: String,
    acquire_script: Script,
    extend_script: Script,
    release_script: Script,
}

impl RedisLockStorageNode {
    /// Creates one node adapter on top of a supervised connection.
    #[must_use]
    pub fn new(supervisor: Arc<RedisConnectionSupervisor>, key_prefix: impl Into<String>) -> Self {
        Self {
            supervisor,
            key_prefix: key_prefix.into(),
            acquire_script: Script::new(ACQUIRE_LOCK_SCRIPT),
            extend_script: Script::new(EXTEND_LOCK_SCRIPT),
            release_script: Script::new(RELEASE_LOCK_SCRIPT),
        }
    }

    /// Returns the supervisor owning this node's connection.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<RedisConnectionSupervisor> {
        &self.supervisor
    }

    fn key_for(&self, key: &LockKey) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn invoke(
        &self,
        script: &Script,
        operation: &str,
        keys: &[LockKey],
        token: &str,
        ttl: Option<Duration>,
    ) -> AppResult<i64> {
        let mut connection = self.supervisor.connection().await?;

        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(self.key_for(key));
        }
        invocation.arg(token);
        if let Some(ttl) = ttl {
            invocation.arg(ttl_millis(ttl));
        }

        let outcome = tokio::time::timeout(
            self.supervisor.settings().command_timeout,
            invocation.invoke_async::<i64>(&mut connection),
        )
        .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                self.supervisor.report_failure();
                Err(AppError::StorageUnavailable(format!(
                    "redis node '{}' failed to {operation}: {error}",
                    self.name()
                )))
            }
            Err(_) => {
                self.supervisor.report_failure();
                Err(AppError::StorageUnavailable(format!(
                    "redis node '{}' timed out trying to {operation}",
                    self.name()
                )))
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockStorageNode for RedisLockStorageNode {
    fn name(&self) -> &str {
        self.supervisor.name()
    }

    async fn set_if_absent(
        &self,
        keys: &[LockKey],
        token: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        let granted = self
            .invoke(&self.acquire_script, "acquire lock", keys, token, Some(ttl))
            .await?;

        Ok(granted == 1)
    }

    async fn extend_if_owned(
        &self,
        keys: &[LockKey],
        token: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        let extended = self
            .invoke(&self.extend_script, "extend lock", keys, token, Some(ttl))
            .await?;

        Ok(extended == 1)
    }

    async fn delete_if_owned(&self, keys: &[LockKey], token: &str) -> AppResult<u64> {
        let deleted = self
            .invoke(&self.release_script, "release lock", keys, token, None)
            .await?;

        Ok(u64::try_from(deleted).unwrap_or_default())
    }
}
