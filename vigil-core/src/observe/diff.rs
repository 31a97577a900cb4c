//! Cycle-safe structural comparison of produced values, with in-place
//! splicing.
//!
//! After every run the observer compares the new value against the previous
//! one to decide whether to call the consumer. The comparison is structural
//! over plain nodes and identity-plus-version over trackable objects, and it
//! has two side effects on the *new* value:
//!
//! - a subtree found deep-equal to its previous counterpart is spliced out
//!   and replaced by the previous subtree, so consumers keep reference
//!   equality for unchanged parts;
//! - every plain node visited is frozen, making the delivered value immune
//!   to later mutation (spliced-in old nodes are already frozen from the
//!   run that produced them).
//!
//! Cycles are handled with a three-phase protocol: a node re-entered during
//! its own comparison is tentatively `Cycle`; when the node that opened the
//! cycle finishes, every participant resolves together to `DeepEqual` (if
//! nothing differed anywhere in the cycle) or `Different`.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::store::ObjId;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CompareResult {
    /// Tentative: comparison of this node is still in progress.
    Cycle,
    /// Strictly equal (same identity or equal primitive).
    Same,
    /// Different identity, equal contents; spliced.
    DeepEqual,
    Different,
}

/// Compares the newly produced value against the previous one. `prev` is
/// `None` on the first run, which always compares `Different` so the first
/// value is delivered.
pub(crate) fn compare(
    curr: &Value,
    prev: Option<&Value>,
    prev_versions: &IndexMap<ObjId, u64>,
) -> CompareResult {
    let Some(prev) = prev else {
        return CompareResult::Different;
    };
    let mut cx = DiffCx {
        // curr node ptr -> (matched prev node ptr, result so far)
        matched: HashMap::new(),
        cycle_roots: IndexSet::new(),
        circulars: IndexSet::new(),
        prev_versions,
    };
    cx.traverse(curr, prev)
}

struct DiffCx<'a> {
    matched: HashMap<usize, (usize, CompareResult)>,
    /// Nodes whose in-progress comparison was re-entered.
    cycle_roots: IndexSet<usize>,
    /// Finished cycle participants awaiting a collective verdict.
    circulars: IndexSet<usize>,
    prev_versions: &'a IndexMap<ObjId, u64>,
}

impl DiffCx<'_> {
    fn traverse(&mut self, curr: &Value, prev: &Value) -> CompareResult {
        if curr.strict_eq(prev) {
            // Same trackable object, but mutated since the last run.
            if let Value::Tracked(obj) = curr {
                if self.prev_versions.get(&obj.id()) != Some(&obj.version()) {
                    return CompareResult::Different;
                }
            }
            return CompareResult::Same;
        }
        let (Value::Node(curr_node), Value::Node(prev_node)) = (curr, prev) else {
            return CompareResult::Different;
        };
        let curr_id = curr_node.ptr_id();
        let prev_id = prev_node.ptr_id();

        if let Some((matched_prev, result)) = self.matched.get(&curr_id).copied() {
            // The same new node matched against two different old nodes
            // cannot be a clean structural match.
            if matched_prev != prev_id {
                return CompareResult::Different;
            }
            if result == CompareResult::Cycle {
                self.cycle_roots.insert(curr_id);
            }
            return result;
        }
        self.matched
            .insert(curr_id, (prev_id, CompareResult::Cycle));

        let entries = curr_node.entries();
        let mut has_diffs =
            entries.len() != prev_node.len() || curr_node.kind() != prev_node.kind();
        let mut has_cycles = false;
        for (key, value) in entries {
            let Some(prev_val) = prev_node.get(key.clone()) else {
                has_diffs = true;
                continue;
            };
            let child = self.traverse(&value, &prev_val);
            if child == CompareResult::DeepEqual {
                curr_node.set(key, prev_val);
            }
            has_diffs |= child == CompareResult::Different;
            has_cycles |= child == CompareResult::Cycle;
        }

        curr_node.freeze();

        let result = if has_diffs {
            self.resolve_circulars(CompareResult::Different);
            self.cycle_roots.clear();
            CompareResult::Different
        } else if has_cycles {
            if self.cycle_roots.swap_remove(&curr_id) && self.cycle_roots.is_empty() {
                // Every open cycle closed here with no diffs anywhere.
                self.resolve_circulars(CompareResult::DeepEqual);
                CompareResult::DeepEqual
            } else {
                self.circulars.insert(curr_id);
                CompareResult::Cycle
            }
        } else {
            CompareResult::DeepEqual
        };
        if let Some(entry) = self.matched.get_mut(&curr_id) {
            entry.1 = result;
        }
        result
    }

    fn resolve_circulars(&mut self, result: CompareResult) {
        for id in self.circulars.drain(..) {
            if let Some(entry) = self.matched.get_mut(&id) {
                entry.1 = result;
            }
        }
    }
}
