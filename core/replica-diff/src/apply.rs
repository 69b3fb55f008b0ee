//! Replaying edits onto a value.

use crate::edit::{DiffEdit, EditKind, Path, PathSegment};
use crate::policy::ConflictPolicy;
use crate::{PatchError, PatchResult};
use serde_json::Value;

/// Outcome of [`apply_with_policy`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    /// Number of edits written into the target.
    pub applied: usize,
    /// Edits skipped because the target had diverged from their old value.
    pub rejected: Vec<DiffEdit>,
}

impl PatchReport {
    /// Whether every edit was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Applies `edits` to `target` in order, last writer wins.
///
/// The patch is atomic: on error `target` is left untouched.
pub fn apply(target: &mut Value, edits: &[DiffEdit]) -> PatchResult<()> {
    apply_with_policy(target, edits, ConflictPolicy::LastWriterWins).map(|_| ())
}

/// Applies `edits` to `target` in order under the given policy.
///
/// The patch is atomic: on error `target` is left untouched. Edits refused by
/// the policy are not errors; they are returned in the report.
pub fn apply_with_policy(
    target: &mut Value,
    edits: &[DiffEdit],
    policy: ConflictPolicy,
) -> PatchResult<PatchReport> {
    let mut working = target.clone();
    let mut report = PatchReport::default();

    for edit in edits {
        if policy == ConflictPolicy::RejectStale && is_stale(&working, edit) {
            report.rejected.push(edit.clone());
            continue;
        }
        apply_edit(&mut working, edit)?;
        report.applied += 1;
    }

    *target = working;
    Ok(report)
}

fn is_stale(root: &Value, edit: &DiffEdit) -> bool {
    let current = root.pointer(&edit.path.to_pointer());
    match edit.op {
        EditKind::Add => match (current, edit.path.split_last()) {
            // Inserting into an array shifts, it never overwrites
            (_, Some((_, PathSegment::Index(_)))) => false,
            (None, _) => false,
            (Some(existing), _) => Some(existing) != edit.value.as_ref(),
        },
        EditKind::Update | EditKind::Delete => current != edit.old_value.as_ref(),
    }
}

fn apply_edit(root: &mut Value, edit: &DiffEdit) -> PatchResult<()> {
    let Some((parent_path, last)) = edit.path.split_last() else {
        *root = match edit.op {
            EditKind::Delete => Value::Null,
            EditKind::Add | EditKind::Update => required_value(edit)?,
        };
        return Ok(());
    };

    let parent = navigate_mut(root, parent_path)?;
    match (parent, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            match edit.op {
                EditKind::Add | EditKind::Update => {
                    map.insert(key.clone(), required_value(edit)?);
                }
                EditKind::Delete => {
                    map.remove(key);
                }
            }
            Ok(())
        }
        (Value::Array(items), PathSegment::Index(index)) => {
            let index = *index;
            let len = items.len();
            let in_bounds = match edit.op {
                EditKind::Add => index <= len,
                EditKind::Update | EditKind::Delete => index < len,
            };
            if !in_bounds {
                return Err(PatchError::IndexOutOfBounds {
                    path: edit.path.to_string(),
                    index,
                    len,
                });
            }
            match edit.op {
                EditKind::Add => items.insert(index, required_value(edit)?),
                EditKind::Update => items[index] = required_value(edit)?,
                EditKind::Delete => {
                    items.remove(index);
                }
            }
            Ok(())
        }
        (Value::Object(_), PathSegment::Index(_)) => Err(PatchError::TypeMismatch {
            path: edit.path.to_string(),
            expected: "array",
        }),
        (Value::Array(_), PathSegment::Key(_)) => Err(PatchError::TypeMismatch {
            path: edit.path.to_string(),
            expected: "object",
        }),
        _ => Err(PatchError::TypeMismatch {
            path: edit.path.to_string(),
            expected: "object or array",
        }),
    }
}

fn navigate_mut<'v>(root: &'v mut Value, segments: &[PathSegment]) -> PatchResult<&'v mut Value> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        let here = || segments[..=depth].iter().cloned().collect::<Path>().to_string();
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => {
                map.get_mut(key).ok_or_else(|| PatchError::PathNotFound(here()))?
            }
            (Value::Array(items), PathSegment::Index(index)) => {
                let len = items.len();
                items.get_mut(*index).ok_or_else(|| PatchError::IndexOutOfBounds {
                    path: here(),
                    index: *index,
                    len,
                })?
            }
            _ => return Err(PatchError::PathNotFound(here())),
        };
    }
    Ok(current)
}

fn required_value(edit: &DiffEdit) -> PatchResult<Value> {
    edit.value
        .clone()
        .ok_or_else(|| PatchError::MissingValue(edit.path.to_string()))
}
