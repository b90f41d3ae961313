//! Request-scoped lock guard.
//!
//! Derives a lock key from an operation's context, runs the wrapped handler
//! only while the lock is held, and always releases it afterwards.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lockwarden_core::{AppError, AppResult};
use lockwarden_domain::{KeyTemplate, LockKey};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::lock_client::DistributedLockClient;


/// Read-only view of an inbound operation used for key derivation.
pub trait OperationContext {
    /// Static identifier of the operation, such as the request route.
    fn operation_identifier(&self) -> String;

    /// Attribute tree walked by key templates.
    fn attribute_tree(&self) -> Value;
}

/// Result of one guarded invocation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    /// The handler ran under the lock and produced a value.
    Completed(T),
    /// Another owner holds the lock; the handler was not invoked.
    AlreadyInProgress {
        /// Key that was contended.
        lock_key: LockKey,
    },
}

impl<T> GuardOutcome<T> {
    /// Returns the handler value when the handler ran.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::AlreadyInProgress { .. } => None,
        }
    }
}

/// Brackets handler invocations with lock acquisition and release.
#[derive(Clone)]
pub struct LockGuard {
    client: Arc<DistributedLockClient>,
    ttl: Duration,
}

impl LockGuard {
    /// Creates a guard using the client's default TTL.
    #[must_use]
    pub fn new(client: Arc<DistributedLockClient>) -> Self {
        let ttl = client.configuration().default_ttl;
        Self { client, ttl }
    }

    /// Overrides the TTL used for every acquisition made by this guard.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// TTL requested for every acquisition.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Derives the lock key for `context`.
    #[must_use]
    pub fn lock_key_for<C>(&self, context: &C, template: &KeyTemplate) -> LockKey
    where
        C: OperationContext,
    {
        template.derive_key(&context.operation_identifier(), &context.attribute_tree())
    }

    /// Runs `handler` with `context` while holding the lock derived from it.
    ///
    /// Contention yields [`GuardOutcome::AlreadyInProgress`] and storage
    /// failures yield `StorageUnavailable`; in both cases the handler is not
    /// invoked. Handler failures are returned unchanged after release.
    pub async fn run<C, H, Fut, T>(
        &self,
        context: C,
        template: &KeyTemplate,
        handler: H,
    ) -> AppResult<GuardOutcome<T>>
    where
        C: OperationContext,
        H: FnOnce(C) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let lock_key = self.lock_key_for(&context, template);
        debug!(lock_key = %lock_key, "lock requested");

        let keys = [lock_key.clone()];
        let guarded = async move { handler(context).await };

        match self.client.run_exclusive(&keys, self.ttl, guarded).await {
            Ok(handled) => handled.map(GuardOutcome::Completed),
            Err(AppError::ResourceLocked(reason)) => {
                warn!(lock_key = %lock_key, reason = %reason, "request already in progress");
                Ok(GuardOutcome::AlreadyInProgress { lock_key })
            }
            Err(failure) => {
                error!(lock_key = %lock_key, error = %failure, "lock acquisition failed");
                Err(failure)
            }
        }
    }

    /// Wraps `handler` so every call runs under the lock derived by `template`.
    #[must_use]
    pub fn wrap<H>(&self, handler: H, template: KeyTemplate) -> GuardedHandler<H> {
        GuardedHandler {
            guard: self.clone(),
            template,
            handler,
        }
    }
}

/// Handler bound to a guard and key template.
#[derive(Clone)]
pub struct GuardedHandler<H> {
    guard: LockGuard,
    template: KeyTemplate,
    handler: H,
}

impl<H> GuardedHandler<H> {
    /// Key template used to derive lock keys.
    #[must_use]
    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    /// Invokes the wrapped handler under the derived lock.
    pub async fn call<C, Fut, T>(&self, context: C) -> AppResult<GuardOutcome<T>>
    where
        C: OperationContext,
        H: Fn(C) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.guard
            .run(context, &self.template, |context| (self.handler)(context))
            .await
    }
}
