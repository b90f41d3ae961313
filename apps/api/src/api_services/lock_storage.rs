use std::sync::Arc;

use lockwarden_application::LockStorageNode;
use lockwarden_core::AppError;
use lockwarden_infrastructure::{
    ConnectionState, InMemoryLockStorageNode, RedisConnectionSupervisor, RedisLockStorageNode,
};
use tracing::{info, warn};

use crate::api_config::{LockStorageBackend, RedisStorageConfig};

use super::{build_redis_client, install_tls_provider};

/// Handle used to observe one storage node.
#[derive(Clone)]
pub enum StorageNodeHandle {
    Redis(Arc<RedisConnectionSupervisor>),
    Memory(Arc<InMemoryLockStorageNode>),
}

impl StorageNodeHandle {
    pub fn name(&self) -> &str {
        match self {
            Self::Redis(supervisor) => supervisor.name(),
            Self::Memory(node) => node.name(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Redis(supervisor) => supervisor.state(),
            Self::Memory(node) if node.is_reachable() => ConnectionState::Connected,
            Self::Memory(_) => ConnectionState::Disconnected,
        }
    }
}

/// Lock storage quorum built from configuration.
pub struct LockStorage {
    nodes: Vec<Arc<dyn LockStorageNode>>,
    handles: Vec<StorageNodeHandle>,
}

impl LockStorage {
    /// Single in-process node; locks are only exclusive within this process.
    pub fn in_memory() -> Self {
        Self::from_memory_nodes(vec![Arc::new(InMemoryLockStorageNode::new("memory-0"))])
    }

    pub fn from_memory_nodes(nodes: Vec<Arc<InMemoryLockStorageNode>>) -> Self {
        Self {
            nodes: nodes
                .iter()
                .map(|node| Arc::clone(node) as Arc<dyn LockStorageNode>)
                .collect(),
            handles: nodes.into_iter().map(StorageNodeHandle::Memory).collect(),
        }
    }

    pub fn nodes(&self) -> Vec<Arc<dyn LockStorageNode>> {
        self.nodes.clone()
    }

    pub fn handles(&self) -> Arc<[StorageNodeHandle]> {
        Arc::from(self.handles.as_slice())
    }

    /// Stops every connection supervisor.
    pub async fn shutdown(&self) {
        for handle in &self.handles {
            if let StorageNodeHandle::Redis(supervisor) = handle {
                supervisor.shutdown().await;
            }
        }
        info!("lock storage connections closed");
    }
}

pub async fn build_lock_storage(backend: &LockStorageBackend) -> Result<LockStorage, AppError> {
    match backend {
        LockStorageBackend::Memory => {
            warn!("using in-memory lock storage; locks are not shared across processes");
            Ok(LockStorage::in_memory())
        }
        LockStorageBackend::Redis(config) => build_redis_storage(config).await,
    }
}

async fn build_redis_storage(config: &RedisStorageConfig) -> Result<LockStorage, AppError> {
    if config.urls.is_empty() {
        return Err(AppError::Validation(
            "at least one redis node url is required".to_owned(),
        ));
    }

    install_tls_provider();
    let mut nodes: Vec<Arc<dyn LockStorageNode>> = Vec::with_capacity(config.urls.len());
    let mut handles = Vec::with_capacity(config.urls.len());
    for (index, url) in config.urls.iter().enumerate() {
        let supervisor = Arc::new(RedisConnectionSupervisor::new(
            format!("redis-{index}"),
            build_redis_client(url)?,
            config.supervisor,
        ));
        supervisor.start().await;

        nodes.push(Arc::new(RedisLockStorageNode::new(
            Arc::clone(&supervisor),
            config.key_prefix.clone(),
        )));
        handles.push(StorageNodeHandle::Redis(supervisor));
    }

    for handle in &handles {
        if let StorageNodeHandle::Redis(supervisor) = handle
            && !supervisor
                .connected_within(config.supervisor.health_check_interval)
                .await
        {
            warn!(node = %supervisor.name(), "redis node not connected at startup");
        }
    }

    info!(nodes = nodes.len(), "redis lock storage quorum configured");
    Ok(LockStorage { nodes, handles })
}
