use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lockwarden_application::LockStorageNode;
use lockwarden_core::{AppError, AppResult};
use lockwarden_domain::LockKey;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory lock storage node.
///
/// Entries expire passively on access. The reachability switch makes the
/// node answer like an unreachable server, which is how node outages are
/// simulated.
pub struct InMemoryLockStorageNode {
    name: String,
    entries: RwLock<HashMap<LockKey, LockEntry>>,
    reachable: AtomicBool,
}

impl InMemoryLockStorageNode {
    /// Creates an empty reachable node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Makes the node reachable or unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns whether the node currently answers.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Returns the token holding `key`, if the key is live.
    pub async fn holder_of(&self, key: &LockKey) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.token.clone())
    }

    /// Returns the number of live keys.
    pub async fn live_key_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    fn ensure_reachable(&self) -> AppResult<()> {
        if self.is_reachable() {
            return Ok(());
        }

        Err(AppError::StorageUnavailable(format!(
            "in-memory node '{}' is unreachable",
            self.name
        )))
    }
}

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or(now)
}

#[async_trait]
impl LockStorageNode for InMemoryLockStorageNode {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    async fn set_if_absent(
        &self,
        keys: &[LockKey],
        token: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        self.ensure_reachable()?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if keys
            .iter()
            .any(|key| entries.get(key).is_some_and(|entry| entry.is_live(now)))
        {
            return Ok(false);
        }

        let expires_at = expiry_after(now, ttl);
        for key in keys {
            entries.insert(
                key.clone(),
                LockEntry {
                    token: token.to_owned(),
                    expires_at,
                },
            );
        }

        Ok(true)
    }

    async fn extend_if_owned(
        &self,
        keys: &[LockKey],
        token: &str,
        ttl: Duration,
    ) -> AppResult<bool> {
        self.ensure_reachable()?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let owned = keys.iter().all(|key| {
            entries
                .get(key)
                .is_some_and(|entry| entry.is_live(now) && entry.token == token)
        });
        if !owned {
            return Ok(false);
        }

        let expires_at = expiry_after(now, ttl);
        for key in keys {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = expires_at;
            }
        }

        Ok(true)
    }

    async fn delete_if_owned(&self, keys: &[LockKey], token: &str) -> AppResult<u64> {
        self.ensure_reachable()?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut deleted = 0;
        for key in keys {
            let Some(entry) = entries.get(key) else {
                continue;
            };
            if !entry.is_live(now) {
                entries.remove(key);
            } else if entry.token == token {
                entries.remove(key);
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}
