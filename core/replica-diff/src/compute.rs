//! Recursive structural comparison.

use crate::edit::{DiffEdit, Path};
use serde_json::{Map, Value};

/// Computes the ordered edits that turn `old` into `new`.
///
/// Objects are compared member by member, arrays slot by slot. Anything else
/// (scalars, or a change of JSON type) becomes a single `update` at the
/// differing path. Equal inputs produce an empty diff.
///
/// Array edits are ordered so they can be replayed front to back: shared
/// slots first, then trailing deletes from the highest index down, then
/// trailing adds in ascending order.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> Vec<DiffEdit> {
    let mut edits = Vec::new();
    diff_into(&Path::root(), old, new, &mut edits);
    edits
}

fn diff_into(path: &Path, old: &Value, new: &Value, edits: &mut Vec<DiffEdit>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            diff_objects(path, old_map, new_map, edits);
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            diff_arrays(path, old_items, new_items, edits);
        }
        _ => edits.push(DiffEdit::update(path.clone(), old.clone(), new.clone())),
    }
}

fn diff_objects(
    path: &Path,
    old_map: &Map<String, Value>,
    new_map: &Map<String, Value>,
    edits: &mut Vec<DiffEdit>,
) {
    for (key, old_value) in old_map {
        match new_map.get(key) {
            Some(new_value) => diff_into(&path.child(key.as_str()), old_value, new_value, edits),
            None => edits.push(DiffEdit::delete(path.child(key.as_str()), old_value.clone())),
        }
    }
    for (key, new_value) in new_map {
        if !old_map.contains_key(key) {
            edits.push(DiffEdit::add(path.child(key.as_str()), new_value.clone()));
        }
    }
}

fn diff_arrays(path: &Path, old_items: &[Value], new_items: &[Value], edits: &mut Vec<DiffEdit>) {
    let shared = old_items.len().min(new_items.len());
    for index in 0..shared {
        diff_into(&path.child(index), &old_items[index], &new_items[index], edits);
    }
    for index in (shared..old_items.len()).rev() {
        edits.push(DiffEdit::delete(path.child(index), old_items[index].clone()));
    }
    for (index, item) in new_items.iter().enumerate().skip(shared) {
        edits.push(DiffEdit::add(path.child(index), item.clone()));
    }
}
