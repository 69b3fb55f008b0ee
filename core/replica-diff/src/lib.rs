//! Structural diff and patch for JSON-shaped records.
//!
//! This crate is the single changeset strategy used by every replicated
//! collection:
//! - [`diff`] compares two values recursively and produces an ordered list of
//!   [`DiffEdit`]s (add / update / delete at a [`Path`]).
//! - [`apply`] replays such a list onto a value in place.
//! - [`apply_with_policy`] does the same while honouring a [`ConflictPolicy`],
//!   reporting edits it refused because the receiver had diverged.
//!
//! Round-trip guarantee: for any two values `a` and `b`,
//! `apply(&mut a.clone(), &diff(&a, &b))` yields a value equal to `b`.
//! Nothing stronger is promised when the receiver no longer equals `a`.

mod apply;
mod compute;
mod edit;
mod policy;

pub use apply::{apply, apply_with_policy, PatchReport};
pub use compute::diff;
pub use edit::{DiffEdit, EditKind, Path, PathSegment};
pub use policy::ConflictPolicy;

/// Result type for patch operations.
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Errors raised while applying a diff.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("edit at {0} is missing its value")]
    MissingValue(String),
}
