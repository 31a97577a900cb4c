//! Whole-object subscription maintenance between runs.
//!
//! After every run the observer must hold exactly one change subscription
//! per trackable object that is either promoted by the tracker or reachable
//! from the produced value. [`collect_tracked`] finds the reachable set
//! (recording each object's version for the structural diff), and
//! [`reconcile_subs`] diffs it against the currently held subscriptions,
//! dropping stale ones and adding missing ones. Surviving subscriptions are
//! kept as-is, never resubscribed.

use indexmap::{IndexMap, IndexSet};

use crate::store::{Obj, ObjId, Subscription};
use crate::value::Value;

/// Trackable objects reachable from `value`, with the version each had at
/// collection time.
///
/// Plain composite nodes are walked through (cycle-safe); trackable objects
/// are boundaries. Their nested contents need no walk: nested changes
/// propagate to the object itself, so one subscription and one version per
/// object covers its whole subtree.
pub(crate) fn collect_tracked(value: &Value) -> IndexMap<ObjId, (Obj, u64)> {
    let mut out = IndexMap::new();
    let mut visited = IndexSet::new();
    walk(value, &mut out, &mut visited);
    out
}

fn walk(value: &Value, out: &mut IndexMap<ObjId, (Obj, u64)>, visited: &mut IndexSet<usize>) {
    match value {
        Value::Tracked(obj) => {
            out.entry(obj.id())
                .or_insert_with(|| (obj.clone(), obj.version()));
        }
        Value::Node(node) => {
            if visited.insert(node.ptr_id()) {
                for (_, child) in node.entries() {
                    walk(&child, out, visited);
                }
            }
        }
        _ => {}
    }
}

/// Brings `subs` in line with `reachable`: drops subscriptions to objects no
/// longer reachable, subscribes to newly reachable ones.
pub(crate) fn reconcile_subs(
    subs: &mut IndexMap<ObjId, Subscription>,
    reachable: &IndexMap<ObjId, Obj>,
    mut subscribe: impl FnMut(&Obj) -> Subscription,
) {
    subs.retain(|id, _| reachable.contains_key(id));
    for (id, obj) in reachable {
        if !subs.contains_key(id) {
            subs.insert(*id, subscribe(obj));
        }
    }
}
