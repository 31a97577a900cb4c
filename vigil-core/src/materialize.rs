//! Turning produced values into fully plain, frozen data.
//!
//! A value delivered to a consumer can still contain trackable objects.
//! [`materialize`] replaces every trackable with its [`crate::store::Obj::snapshot`]
//! and copies every plain node into a frozen duplicate, yielding a tree with
//! no live store references at all.
//!
//! Copies are memoized by source-node identity in a thread-local map that
//! persists across calls, so the same node materializes to the same copy
//! every time it is seen, including from different deliveries. Combined with
//! the diff engine's splicing, this gives consumers reference equality for
//! unchanged subtrees of materialized results. Entries are held weakly and
//! dropped once the source node is gone.
//!
//! Opaque references and primitives pass through untouched.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

use crate::value::{NodeCell, NodeKind, NodeRef, Value};

thread_local! {
    static SNAP_MEMO: RefCell<HashMap<usize, (Weak<NodeCell>, Value)>> =
        RefCell::new(HashMap::new());
}

/// Materializes `value`: trackables become snapshots, plain nodes become
/// frozen memoized copies, everything else passes through.
pub fn materialize(value: &Value) -> Value {
    SNAP_MEMO.with(|m| {
        // Drop memo entries whose source node is gone.
        m.borrow_mut().retain(|_, (weak, _)| weak.strong_count() > 0);
    });
    materialize_inner(value)
}

fn materialize_inner(value: &Value) -> Value {
    match value {
        Value::Tracked(obj) => obj.snapshot(),
        Value::Node(node) => snap_node(node),
        other => other.clone(),
    }
}

fn snap_node(node: &NodeRef) -> Value {
    let key = node.ptr_id();
    let hit = SNAP_MEMO.with(|m| {
        let mut memo = m.borrow_mut();
        match memo.get(&key) {
            // The weak ref guards against address reuse: a hit only counts
            // while the original source node is still alive.
            Some((weak, snap)) if weak.strong_count() > 0 => Some(snap.clone()),
            Some(_) => {
                memo.remove(&key);
                None
            }
            None => None,
        }
    });
    if let Some(snap) = hit {
        return snap;
    }

    let copy = match node.kind() {
        NodeKind::Map => NodeRef::map(),
        NodeKind::List => NodeRef::list(),
    };
    // Memoize before descending so cyclic nodes resolve to the copy.
    SNAP_MEMO.with(|m| {
        m.borrow_mut()
            .insert(key, (node.downgrade(), Value::Node(copy.clone())));
    });
    for (k, v) in node.entries() {
        copy.set(k, materialize_inner(&v));
    }
    copy.freeze();
    Value::Node(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Obj;

    #[test]
    fn primitives_pass_through() {
        assert_eq!(materialize(&Value::Int(7)), Value::Int(7));
        assert_eq!(materialize(&Value::str("a")), Value::str("a"));
    }

    #[test]
    fn opaque_passes_through_by_identity() {
        let v = Value::opaque(vec![1u8, 2]);
        assert!(materialize(&v).strict_eq(&v));
    }

    #[test]
    fn plain_cycles_are_preserved_in_the_copy() {
        let node = NodeRef::map();
        node.set("v", 0i64);
        node.set("parent", node.clone());

        let snap = materialize(&Value::Node(node.clone()));
        let snap_node = snap.as_node().unwrap();
        assert!(!snap_node.ptr_eq(&node));
        assert!(snap_node.is_frozen());
        let parent = snap_node.get("parent").unwrap();
        assert!(parent.as_node().unwrap().ptr_eq(snap_node));
    }

    #[test]
    fn same_source_node_materializes_to_the_same_copy() {
        let node = NodeRef::map();
        node.set("y", 0i64);

        let a = materialize(&Value::Node(node.clone()));
        let b = materialize(&Value::Node(node.clone()));
        assert!(a.strict_eq(&b));
    }

    #[test]
    fn trackables_become_snapshots() {
        let obj = Obj::map();
        obj.set("x", 1i64);
        let wrapper = NodeRef::map();
        wrapper.set("state", obj.clone());

        let snap = materialize(&Value::Node(wrapper));
        let state = snap.as_node().unwrap().get("state").unwrap();
        let state = state.as_node().expect("snapshot is plain");
        assert_eq!(state.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn dead_source_nodes_do_not_pin_the_memo() {
        let node = NodeRef::map();
        let key_val = materialize(&Value::Node(node.clone()));
        drop(key_val);
        drop(node);

        // Next call prunes; a fresh node must get a fresh copy even if the
        // allocator reuses the address.
        let other = NodeRef::map();
        other.set("z", 1i64);
        let snap = materialize(&Value::Node(other));
        assert_eq!(snap.as_node().unwrap().get("z"), Some(Value::Int(1)));
    }
}
