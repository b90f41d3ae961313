mod lock_storage;
mod redis;

pub use lock_storage::{LockStorage, StorageNodeHandle, build_lock_storage};
pub use redis::{build_redis_client, install_tls_provider};
