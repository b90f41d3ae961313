use std::fmt::{Display, Formatter};

use lockwarden_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attribute::{AttributePath, ResolvedAttribute, resolve};

/// Name of the resource protected by one lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey(String);

impl LockKey {
    /// Creates a lock key from an explicit, non-empty value.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "lock key must not be empty".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Builds `{operation_identifier}-{discriminator}`.
    #[must_use]
    pub fn derive(operation_identifier: &str, discriminator: &ResolvedAttribute) -> Self {
        Self(format!(
            "{operation_identifier}-{}",
            discriminator.as_key_fragment()
        ))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for LockKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

impl From<LockKey> for String {
    fn from(value: LockKey) -> Self {
        value.0
    }
}

/// Template naming the context attribute that discriminates lock keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyTemplate {
    path: AttributePath,
}

impl KeyTemplate {
    /// Parses a dot-separated attribute path template.
    pub fn parse(template: &str) -> AppResult<Self> {
        Ok(Self {
            path: AttributePath::parse(template)?,
        })
    }

    /// Returns the attribute path this template resolves.
    #[must_use]
    pub fn path(&self) -> &AttributePath {
        &self.path
    }

    /// Derives the lock key for one operation.
    #[must_use]
    pub fn derive_key(&self, operation_identifier: &str, attributes: &Value) -> LockKey {
        LockKey::derive(operation_identifier, &resolve(attributes, &self.path))
    }
}
