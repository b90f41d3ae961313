//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod attribute;
mod lock_key;

pub use attribute::{ABSENT_ATTRIBUTE, AttributePath, ResolvedAttribute, resolve};
pub use lock_key::{KeyTemplate, LockKey};
