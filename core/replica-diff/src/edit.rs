//! Edit types produced by [`crate::diff`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The kind of a single structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    /// A key or array slot that did not exist before.
    Add,
    /// A leaf whose value changed (or whose JSON type changed).
    Update,
    /// A key or array slot that no longer exists.
    Delete,
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One step into a JSON value: an object member or an array index.
///
/// Serialized untagged, so a path reads as `["contacts", 0, "email"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // JSON pointer escaping (RFC 6901)
            Self::Key(key) => write!(f, "{}", key.replace('~', "~0").replace('/', "~1")),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A location inside a record. The empty path addresses the record itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// The path of the record root.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// The segments of this path, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Whether this path addresses the record root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits the path into its parent and final segment.
    #[must_use]
    pub fn split_last(&self) -> Option<(&[PathSegment], &PathSegment)> {
        self.0.split_last().map(|(last, parent)| (parent, last))
    }

    /// Renders the path as a JSON pointer (e.g. `/contacts/0/email`).
    #[must_use]
    pub fn to_pointer(&self) -> String {
        self.0.iter().map(|s| format!("/{s}")).collect()
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "(root)")
        } else {
            write!(f, "{}", self.to_pointer())
        }
    }
}

/// One structural edit: what happened, where, and the values on either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEdit {
    pub op: EditKind,
    pub path: Path,
    /// The value after the edit. Absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// The value before the edit. Absent for adds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

impl DiffEdit {
    /// An insertion of `value` at `path`.
    #[must_use]
    pub fn add(path: Path, value: Value) -> Self {
        Self {
            op: EditKind::Add,
            path,
            value: Some(value),
            old_value: None,
        }
    }

    /// A replacement of `old_value` by `value` at `path`.
    #[must_use]
    pub fn update(path: Path, old_value: Value, value: Value) -> Self {
        Self {
            op: EditKind::Update,
            path,
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    /// A removal of `old_value` from `path`.
    #[must_use]
    pub fn delete(path: Path, old_value: Value) -> Self {
        Self {
            op: EditKind::Delete,
            path,
            value: None,
            old_value: Some(old_value),
        }
    }
}
