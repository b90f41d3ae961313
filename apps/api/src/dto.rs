use lockwarden_domain::LockKey;
use serde::Serialize;

/// API error payload.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    message: String,
}

impl ErrorResponse {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

/// Payload returned when an identical request already holds the lock.
#[derive(Debug, Serialize)]
pub struct AlreadyInProgressResponse {
    pub status: &'static str,
    pub lock_key: LockKey,
}

impl AlreadyInProgressResponse {
    pub fn new(lock_key: LockKey) -> Self {
        Self {
            status: "already_in_progress",
            lock_key,
        }
    }
}

/// Health response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected: usize,
    pub required: usize,
    pub nodes: Vec<NodeHealthResponse>,
}

/// Connection state of one lock storage node.
#[derive(Debug, Serialize)]
pub struct NodeHealthResponse {
    pub name: String,
    pub state: &'static str,
}
