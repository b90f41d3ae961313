//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_lock_storage_node;
mod redis_connection_supervisor;
mod redis_lock_storage_node;


pub use in_memory_lock_storage_node::InMemoryLockStorageNode;
pub use redis_connection_supervisor::{
    ConnectionState, RedisConnectionSupervisor, RedisSupervisorSettings,
};
pub use redis_lock_storage_node::RedisLockStorageNode;
