//! Change routing: deciding whether a committed mutation hits a recorded
//! dependency.
//!
//! Direct hits are exact `(object, property)` matches. Two synthetic keys
//! need interpretation:
//!
//! - A `Length` write carries the old and new list lengths. It hits a
//!   recorded `Length` dep directly, and it also hits any recorded index
//!   that a *shrink* truncated away (`new_len <= i < old_len`). Growing a
//!   list never invalidates an existing index read.
//! - A `Shape` write (key added or removed) hits recorded `Shape` deps,
//!   which is what existence checks and map enumeration record.

use crate::observe::tracker::DepMap;
use crate::store::Obj;
use crate::value::{PropKey, Value};

/// Whether a write to `(obj, key)` should re-run the owning observer.
pub(crate) fn should_trigger(
    deps: &DepMap,
    obj: &Obj,
    key: &PropKey,
    prev: Option<&Value>,
    new: Option<&Value>,
) -> bool {
    let Some(entry) = deps.get(&obj.id()) else {
        return false;
    };
    if entry.props.contains(key) {
        return true;
    }
    if *key == PropKey::Length {
        let (Some(Value::Int(old_len)), Some(Value::Int(new_len))) = (prev, new) else {
            return false;
        };
        if new_len < old_len {
            let (old_len, new_len) = (*old_len as usize, *new_len as usize);
            return entry.props.iter().any(|p| match p {
                PropKey::Index(i) => new_len <= *i && *i < old_len,
                _ => false,
            });
        }
    }
    false
}
