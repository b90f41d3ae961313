use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lockwarden_core::{AppError, AppResult};
use lockwarden_domain::LockKey;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lock_ports::LockStorageNode;

use super::config::LockConfiguration;
use super::quorum::QuorumTally;
use super::record::{LockRecord, describe_keys, generate_token};

/// Client implementing acquisition, extension, and release against the quorum.
///
/// Holds no per-lock state; one instance is shared read-only by every
/// concurrent caller.
pub struct DistributedLockClient {
    nodes: Vec<Arc<dyn LockStorageNode>>,
    configuration: LockConfiguration,
}

impl DistributedLockClient {
    /// Creates a client over a non-empty quorum.
    pub fn new(
        nodes: Vec<Arc<dyn LockStorageNode>>,
        configuration: LockConfiguration,
    ) -> AppResult<Self> {
        if nodes.is_empty() {
            return Err(AppError::Validation(
                "lock quorum must contain at least one storage node".to_owned(),
            ));
        }

        configuration.validate()?;

        Ok(Self {
            nodes,
            configuration,
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn configuration(&self) -> &LockConfiguration {
        &self.configuration
    }

    /// Number of nodes in the quorum.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes that must agree for any operation to succeed.
    #[must_use]
    pub fn majority(&self) -> usize {
        QuorumTally::majority_of(self.nodes.len())
    }

    /// Acquires a lock on all `keys` for `ttl`.
    ///
    /// Contended attempts are retried up to `retry_count` times with a
    /// jittered pause. Fails with `ResourceLocked` on contention and
    /// `StorageUnavailable` when too few nodes answer.
    pub async fn acquire(&self, keys: &[LockKey], ttl: Duration) -> AppResult<LockRecord> {
        validate_request(keys, ttl)?;

        let mut attempt: u32 = 0;
        loop {
            match self.attempt_acquire(keys, ttl).await {
                Err(error) if error.is_contention() && attempt < self.configuration.retry_count => {
                    attempt += 1;
                    let pause = self.configuration.retry_pause();
                    debug!(
                        lock_key = %describe_keys(keys),
                        attempt,
                        pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                        "lock contended, retrying"
                    );
                    tokio::time::sleep(pause).await;
                }
                result => return result,
            }
        }
    }

    async fn attempt_acquire(&self, keys: &[LockKey], ttl: Duration) -> AppResult<LockRecord> {
        let token: Arc<str> = Arc::from(generate_token()?);
        let shared_keys: Arc<[LockKey]> = Arc::from(keys);
        let pending = PendingGrant::new(self, Arc::clone(&shared_keys), Arc::clone(&token));
        let started_at = Instant::now();

        let answers = self
            .fan_out(|node| {
                let keys = Arc::clone(&shared_keys);
                let token = Arc::clone(&token);
                async move { node.set_if_absent(&keys, &token, ttl).await }
            })
            .await;
        let tally = QuorumTally::count(self.nodes.len(), &answers, |granted| *granted);

        if tally.has_majority()
            && let Some(expires_at) = self.expiry_if_valid(started_at, ttl)
        {
            pending.disarm();
            return Ok(LockRecord::new(
                keys.to_vec(),
                token.to_string(),
                started_at,
                expires_at,
                tally.granted(),
            ));
        }

        self.discard_partial(shared_keys, token).await;
        pending.disarm();
        Err(self.classify_failure(&tally, keys, "is held by another owner"))
    }

    /// Pushes the expiry of a held lock to `ttl` from now, keeping its token.
    pub async fn extend(&self, record: &LockRecord, ttl: Duration) -> AppResult<LockRecord> {
        validate_request(record.keys(), ttl)?;

        if record.is_expired() {
            return Err(AppError::ResourceLocked(format!(
                "lock for {} has already expired",
                record.describe_keys()
            )));
        }

        let token: Arc<str> = Arc::from(record.token());
        let shared_keys: Arc<[LockKey]> = Arc::from(record.keys());
        let started_at = Instant::now();

        let answers = self
            .fan_out(|node| {
                let keys = Arc::clone(&shared_keys);
                let token = Arc::clone(&token);
                async move { node.extend_if_owned(&keys, &token, ttl).await }
            })
            .await;
        let tally = QuorumTally::count(self.nodes.len(), &answers, |extended| *extended);

        if tally.has_majority()
            && let Some(expires_at) = self.expiry_if_valid(started_at, ttl)
        {
            return Ok(record.extended(expires_at, tally.granted()));
        }

        Err(self.classify_failure(&tally, record.keys(), "is no longer held by this owner"))
    }

    /// Deletes the lock from every node that still stores its token.
    ///
    /// Fails with `ReleaseFailed` when fewer than a majority of nodes
    /// answered; the lock then lapses at its expiry.
    pub async fn release(&self, record: &LockRecord) -> AppResult<()> {
        let token: Arc<str> = Arc::from(record.token());
        let shared_keys: Arc<[LockKey]> = Arc::from(record.keys());

        let answers = self
            .fan_out(|node| {
                let keys = Arc::clone(&shared_keys);
                let token = Arc::clone(&token);
                async move { node.delete_if_owned(&keys, &token).await }
            })
            .await;
        let tally = QuorumTally::count(self.nodes.len(), &answers, |deleted| *deleted > 0);

        if !tally.majority_reachable() {
            return Err(AppError::ReleaseFailed(format!(
                "{} while releasing {}",
                tally.describe_reachability(),
                record.describe_keys()
            )));
        }

        debug!(
            lock_key = %record.describe_keys(),
            deleted_on = tally.granted(),
            "lock released"
        );
        Ok(())
    }

    /// Drives `body` while keeping `record` alive.
    ///
    /// The lock is extended by `ttl` whenever its remaining validity drops
    /// below the automatic extension threshold. Extensions run alongside
    /// `body`, which is polled while a renewal waits on the nodes. A failed
    /// extension stops renewal; `body` keeps running and the lock lapses at
    /// its expiry.
    pub async fn hold<F>(&self, record: LockRecord, ttl: Duration, body: F) -> (F::Output, LockRecord)
    where
        F: Future,
    {
        let mut record = record;
        tokio::pin!(body);

        let output = {
            let renewal = self.keep_alive(&mut record, ttl);
            tokio::pin!(renewal);

            let finished = tokio::select! {
                biased;
                output = &mut body => Some(output),
                () = &mut renewal => None,
            };
            match finished {
                Some(output) => output,
                None => body.await,
            }
        };

        (output, record)
    }

    async fn keep_alive(&self, record: &mut LockRecord, ttl: Duration) {
        let threshold = self.configuration.automatic_extension_threshold;
        if ttl.saturating_sub(self.configuration.drift_for(ttl)) <= threshold {
            return;
        }

        loop {
            let renew_at = record
                .expires_at()
                .checked_sub(threshold)
                .unwrap_or_else(Instant::now);
            tokio::time::sleep_until(renew_at).await;

            match self.extend(record, ttl).await {
                Ok(extended) => {
                    debug!(
                        lock_key = %extended.describe_keys(),
                        granted_by = extended.granted_by(),
                        "lock extended"
                    );
                    *record = extended;
                }
                Err(error) => {
                    warn!(
                        lock_key = %record.describe_keys(),
                        error = %error,
                        "lock extension failed, lock will expire passively"
                    );
                    return;
                }
            }
        }
    }

    /// Runs `body` under a lock on `keys`.
    ///
    /// `body` is polled only after the lock is acquired. The lock is released
    /// once `body` completes; if this future is dropped first, the release is
    /// spawned onto the current runtime. Release failures are logged and
    /// never replace the body's output.
    pub async fn run_exclusive<F>(
        self: &Arc<Self>,
        keys: &[LockKey],
        ttl: Duration,
        body: F,
    ) -> AppResult<F::Output>
    where
        F: Future,
    {
        let record = self.acquire(keys, ttl).await?;
        debug!(
            lock_key = %record.describe_keys(),
            granted_by = record.granted_by(),
            "lock acquired"
        );

        let mut held = HeldLock::new(Arc::clone(self), record.clone());
        let (output, _) = self.hold(record, ttl, body).await;

        if let Err(error) = held.release().await {
            warn!(
                lock_key = %describe_keys(keys),
                error = %error,
                "lock release failed, lock will expire at its ttl"
            );
        }

        Ok(output)
    }

    async fn discard_partial(&self, keys: Arc<[LockKey]>, token: Arc<str>) {
        let answers = self
            .fan_out(|node| {
                let keys = Arc::clone(&keys);
                let token = Arc::clone(&token);
                async move { node.delete_if_owned(&keys, &token).await }
            })
            .await;
        let discarded: u64 = answers.iter().filter_map(|answer| answer.as_ref().ok()).sum();

        if discarded > 0 {
            debug!(
                lock_key = %describe_keys(&keys),
                discarded,
                "discarded partial lock grants"
            );
        }
    }

    fn expiry_if_valid(&self, started_at: Instant, ttl: Duration) -> Option<Instant> {
        let drift = self.configuration.drift_for(ttl);
        let spent = started_at.elapsed().checked_add(drift)?;
        let validity = ttl.checked_sub(spent)?;
        if validity.is_zero() {
            return None;
        }

        Some(started_at + (ttl - drift))
    }

    fn classify_failure(&self, tally: &QuorumTally, keys: &[LockKey], contention: &str) -> AppError {
        let lock_key = describe_keys(keys);

        if !tally.majority_reachable() {
            return AppError::StorageUnavailable(format!(
                "{} for {lock_key}",
                tally.describe_reachability()
            ));
        }

        if tally.has_majority() {
            return AppError::StorageUnavailable(format!(
                "quorum for {lock_key} answered after the lock validity elapsed"
            ));
        }

        AppError::ResourceLocked(format!("{lock_key} {contention}"))
    }

    async fn fan_out<T, F, Fut>(&self, operation: F) -> Vec<AppResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn LockStorageNode>) -> Fut,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for node in &self.nodes {
            let name = node.name().to_owned();
            let pending = operation(Arc::clone(node));
            tasks.spawn(async move { (name, pending.await) });
        }

        let mut answers = Vec::with_capacity(self.nodes.len());
        while let Some(joined) = tasks.join_next().await {
            let answer = match joined {
                Ok((node, answer)) => {
                    if let Err(error) = &answer {
                        warn!(node = %node, error = %error, "lock storage node did not answer");
                    }
                    answer
                }
                Err(error) => Err(AppError::Internal(format!(
                    "lock storage task failed: {error}"
                ))),
            };
            answers.push(answer);
        }

        answers
    }
}

fn validate_request(keys: &[LockKey], ttl: Duration) -> AppResult<()> {
    if keys.is_empty() {
        return Err(AppError::Validation(
            "at least one lock key is required".to_owned(),
        ));
    }

    if ttl.is_zero() {
        return Err(AppError::Validation(
            "lock ttl must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}

/// Grants of an acquisition attempt that has not yet produced a record.
///
/// Dropped while armed, it deletes the attempt's token from every node in
/// the background, so a cancelled acquisition leaves no key behind.
struct PendingGrant<'a> {
    client: &'a DistributedLockClient,
    keys: Arc<[LockKey]>,
    token: Arc<str>,
    armed: bool,
}

impl<'a> PendingGrant<'a> {
    fn new(client: &'a DistributedLockClient, keys: Arc<[LockKey]>, token: Arc<str>) -> Self {
        Self {
            client,
            keys,
            token,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let nodes = self.client.nodes.clone();
        let keys = Arc::clone(&self.keys);
        let token = Arc::clone(&self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(
                    lock_key = %describe_keys(&keys),
                    "lock acquisition cancelled, discarding grants in background"
                );
                runtime.spawn(async move {
                    let mut tasks = JoinSet::new();
                    for node in nodes {
                        let keys = Arc::clone(&keys);
                        let token = Arc::clone(&token);
                        tasks.spawn(async move {
                            let answer = node.delete_if_owned(&keys, &token).await;
                            (node.name().to_owned(), answer)
                        });
                    }

                    while let Some(joined) = tasks.join_next().await {
                        if let Ok((node, Err(error))) = joined {
                            warn!(
                                node = %node,
                                lock_key = %describe_keys(&keys),
                                error = %error,
                                "background grant discard failed, key will expire at its ttl"
                            );
                        }
                    }
                });
            }
            Err(_) => warn!(
                lock_key = %describe_keys(&self.keys),
                "no async runtime to discard grants, keys will expire at their ttl"
            ),
        }
    }
}

/// Lock ownership released on every exit path of its holder.
struct HeldLock {
    client: Arc<DistributedLockClient>,
    record: Option<LockRecord>,
}

impl HeldLock {
    fn new(client: Arc<DistributedLockClient>, record: LockRecord) -> Self {
        Self {
            client,
            record: Some(record),
        }
    }

    async fn release(&mut self) -> AppResult<()> {
        let Some(record) = self.record.clone() else {
            return Ok(());
        };

        debug!(lock_key = %record.describe_keys(), "releasing lock");
        let result = self.client.release(&record).await;
        self.record = None;
        result
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };

        let client = Arc::clone(&self.client);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(
                    lock_key = %record.describe_keys(),
                    "lock holder cancelled, releasing in background"
                );
                runtime.spawn(async move {
                    if let Err(error) = client.release(&record).await {
                        warn!(
                            lock_key = %record.describe_keys(),
                            error = %error,
                            "background lock release failed, lock will expire at its ttl"
                        );
                    }
                });
            }
            Err(_) => warn!(
                lock_key = %record.describe_keys(),
                "no async runtime to release lock, lock will expire at its ttl"
            ),
        }
    }
}
