use std::fmt::{Display, Formatter};

use lockwarden_core::{AppError, AppResult};
use serde_json::Value;

/// Key fragment rendered in place of an attribute that could not be resolved.
pub const ABSENT_ATTRIBUTE: &str = "null";

/// Dot-separated path into an operation context's attribute tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    raw: String,
    segments: Vec<String>,
}

impl AttributePath {
    /// Parses a path such as `headers.user-id`.
    ///
    /// Leading and trailing whitespace is ignored. Empty paths and empty
    /// segments (`headers..user-id`) are rejected.
    pub fn parse(path: &str) -> AppResult<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "attribute path must not be empty".to_owned(),
            ));
        }

        let segments = trimmed
            .split('.')
            .map(|segment| {
                if segment.is_empty() {
                    Err(AppError::Validation(format!(
                        "attribute path '{trimmed}' contains an empty segment"
                    )))
                } else {
                    Ok(segment.to_owned())
                }
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            raw: trimmed.to_owned(),
            segments,
        })
    }

    /// Returns the path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Returns the individual path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl Display for AttributePath {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.raw.as_str())
    }
}

/// Result of resolving an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedAttribute {
    /// Leaf value rendered as a string.
    Present(String),
    /// Some segment along the path was missing or null.
    Absent,
}

impl ResolvedAttribute {
    /// Returns the fragment used when building a lock key.
    #[must_use]
    pub fn as_key_fragment(&self) -> &str {
        match self {
            Self::Present(value) => value.as_str(),
            Self::Absent => ABSENT_ATTRIBUTE,
        }
    }

    /// Returns true when the path did not resolve to a value.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Walks `path` into `tree`.
///
/// Objects are walked by key and arrays by numeric index. A missing segment,
/// a `null`, or a walk through a scalar yields [`ResolvedAttribute::Absent`].
#[must_use]
pub fn resolve(tree: &Value, path: &AttributePath) -> ResolvedAttribute {
    let mut current = tree;

    for segment in path.segments() {
        let next = match current {
            Value::Object(fields) => fields.get(segment.as_str()),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        };

        match next {
            Some(value) => current = value,
            None => return ResolvedAttribute::Absent,
        }
    }

    match current {
        Value::Null => ResolvedAttribute::Absent,
        Value::String(value) => ResolvedAttribute::Present(value.clone()),
        other => ResolvedAttribute::Present(other.to_string()),
    }
}
