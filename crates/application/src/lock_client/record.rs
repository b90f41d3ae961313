use std::fmt::Write;
use std::time::Duration;

use lockwarden_core::{AppError, AppResult};
use lockwarden_domain::LockKey;
use tokio::time::Instant;

/// Bytes of OS randomness in one lock token.
const TOKEN_BYTES: usize = 16;

/// A lock granted by a majority of the quorum.
///
/// The token never changes across extensions; only the expiry moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    keys: Vec<LockKey>,
    token: String,
    acquired_at: Instant,
    expires_at: Instant,
    granted_by: usize,
}

impl LockRecord {
    pub(super) fn new(
        keys: Vec<LockKey>,
        token: String,
        acquired_at: Instant,
        expires_at: Instant,
        granted_by: usize,
    ) -> Self {
        Self {
            keys,
            token,
            acquired_at,
            expires_at,
            granted_by,
        }
    }

    pub(super) fn extended(&self, expires_at: Instant, granted_by: usize) -> Self {
        Self {
            expires_at,
            granted_by,
            ..self.clone()
        }
    }

    /// Keys covered by this lock.
    #[must_use]
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    /// Ownership token stored on the granting nodes.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Start of the acquisition attempt that produced this lock.
    #[must_use]
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Instant after which the lock must be considered lost.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Number of nodes that granted the latest acquisition or extension.
    #[must_use]
    pub fn granted_by(&self) -> usize {
        self.granted_by
    }

    /// Validity left before expiry.
    #[must_use]
    pub fn remaining_validity(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the expiry instant has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }

    /// Comma-separated key list for logs and error messages.
    #[must_use]
    pub fn describe_keys(&self) -> String {
        describe_keys(&self.keys)
    }
}

pub(super) fn describe_keys(keys: &[LockKey]) -> String {
    keys.iter()
        .map(LockKey::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Generates a hex-encoded random ownership token.
pub(super) fn generate_token() -> AppResult<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|error| AppError::Internal(format!("failed to generate lock token: {error}")))?;

    Ok(bytes
        .iter()
        .fold(String::with_capacity(TOKEN_BYTES * 2), |mut acc, byte| {
            let _ = write!(acc, "{byte:02x}");
            acc
        }))
}
