use std::sync::Arc;

use lockwarden_application::{DistributedLockClient, LockGuard};
use lockwarden_core::AppError;
use lockwarden_domain::KeyTemplate;

use crate::api_services::StorageNodeHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub lock_client: Arc<DistributedLockClient>,
    pub lock_guard: LockGuard,
    pub storage_nodes: Arc<[StorageNodeHandle]>,
}

impl AppState {
    pub fn new(lock_client: Arc<DistributedLockClient>, storage_nodes: Arc<[StorageNodeHandle]>) -> Self {
        Self {
            lock_guard: LockGuard::new(Arc::clone(&lock_client)),
            lock_client,
            storage_nodes,
        }
    }

    /// Builds the middleware state guarding a route by `template`.
    pub fn request_lock(&self, template: &str) -> Result<RequestLock, AppError> {
        Ok(RequestLock {
            guard: self.lock_guard.clone(),
            template: Arc::new(KeyTemplate::parse(template)?),
        })
    }
}

/// Per-route lock settings used by the request lock middleware.
#[derive(Clone)]
pub struct RequestLock {
    pub guard: LockGuard,
    pub template: Arc<KeyTemplate>,
}
