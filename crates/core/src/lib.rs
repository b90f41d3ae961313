//! Shared primitives for all Rust crates in Lockwarden.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used across Lockwarden crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Invalid input, configuration, or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// The resource is currently held by another owner.
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// Too few lock storage nodes answered to form a majority.
    #[error("lock storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Releasing a lock did not reach a majority of storage nodes.
    #[error("lock release failed: {0}")]
    ReleaseFailed(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when the error describes contention rather than a fault.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::ResourceLocked(_))
    }
}
