//! Access tracking: which properties of which objects a tracked run read.
//!
//! The tracker records per-object property sets in insertion order. An
//! object can also be *promoted* to whole-object tracking, after which its
//! individual properties stop being recorded: any committed change to it
//! (including nested ones, via the store's propagation) should re-run the
//! observer. Promotion happens when the run enumerates the object, or when
//! it reads a list's length alongside at least one other property, which is
//! the signature of an iteration pass.

use indexmap::{IndexMap, IndexSet};

use crate::store::{Obj, ObjId};
use crate::value::{NodeKind, PropKey};

/// Properties read on one object during a tracked run.
pub(crate) struct DepEntry {
    pub(crate) obj: Obj,
    pub(crate) props: IndexSet<PropKey>,
}

/// Per-property dependencies, keyed by object identity.
pub(crate) type DepMap = IndexMap<ObjId, DepEntry>;

/// Objects promoted to whole-object tracking.
pub(crate) type PromotedMap = IndexMap<ObjId, Obj>;

/// Records one read into the dependency maps, applying the promotion rules.
pub(crate) fn record_read(deps: &mut DepMap, promoted: &mut PromotedMap, obj: &Obj, key: &PropKey) {
    let id = obj.id();
    if promoted.contains_key(&id) {
        return;
    }

    if *key == PropKey::Iter {
        promote(deps, promoted, obj);
        return;
    }

    let entry = deps.entry(id).or_insert_with(|| DepEntry {
        obj: obj.clone(),
        props: IndexSet::new(),
    });
    entry.props.insert(key.clone());

    // A list whose length is read next to other properties is being
    // iterated; track the whole object instead of chasing every index.
    if obj.kind() == NodeKind::List
        && entry.props.len() > 1
        && entry.props.contains(&PropKey::Length)
    {
        promote(deps, promoted, obj);
    }
}

fn promote(deps: &mut DepMap, promoted: &mut PromotedMap, obj: &Obj) {
    deps.shift_remove(&obj.id());
    promoted.insert(obj.id(), obj.clone());
}
