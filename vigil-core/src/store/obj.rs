//! Trackable objects.
//!
//! An `Obj` is an identity-keyed, observable map or list. Every read through
//! it notifies the global read listeners; every committed mutation bumps its
//! version, notifies the global write listeners, and fires its per-object
//! subscriptions. This is the full capability surface the observation engine
//! consumes: it never constructs state on its own, it only watches objects
//! built here.
//!
//! # Versioning and propagation
//!
//! Versions come from one global monotonic sequence. Storing a trackable
//! child installs a forwarding subscription on it, so a mutation anywhere in
//! a subtree bumps every ancestor's version and notifies ancestor
//! subscribers. Cyclic ownership is allowed; a per-object `notifying` flag
//! stops propagation loops.
//!
//! # Deep tracking
//!
//! Plain composite nodes are converted into trackable children when
//! inserted (cycle-safe). After insertion, a trackable object only ever
//! contains primitives, other trackable objects, and opaque references.
//!
//! # No-op writes
//!
//! A write whose new value is strictly equal to the previous value commits
//! nothing and notifies nobody. `NaN` is not equal to itself, so overwriting
//! `NaN` with `NaN` does fire.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::store::listeners;
use crate::store::subscription::{next_sub_id, SubEntry, Subscription};
use crate::value::{NodeData, NodeKind, NodeRef, PropKey, Value};

static NEXT_OBJ_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Unique identity of a trackable object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjId(u64);

pub(crate) struct ObjInner {
    id: ObjId,
    kind: NodeKind,
    data: RefCell<NodeData>,
    version: Cell<u64>,
    pub(crate) subs: RefCell<Vec<SubEntry>>,
    /// Forwarding subscriptions on trackable children, keyed by the property
    /// holding the child.
    links: RefCell<IndexMap<PropKey, Subscription>>,
    /// Guards against propagation loops through cyclic ownership.
    notifying: Cell<bool>,
    /// Snapshot cache: valid while the version matches.
    snap: RefCell<Option<(u64, Value)>>,
}

/// One committed mutation, as delivered to write listeners.
struct WriteOp {
    key: PropKey,
    prev: Option<Value>,
    new: Option<Value>,
}

impl WriteOp {
    fn shape() -> Self {
        WriteOp {
            key: PropKey::Shape,
            prev: None,
            new: None,
        }
    }
}

/// A trackable map or list. Cloning clones the handle, not the contents.
#[derive(Clone)]
pub struct Obj(pub(crate) Rc<ObjInner>);

impl Obj {
    pub fn map() -> Self {
        Self::new(NodeKind::Map)
    }

    pub fn list() -> Self {
        Self::new(NodeKind::List)
    }

    fn new(kind: NodeKind) -> Self {
        Obj(Rc::new(ObjInner {
            id: ObjId(NEXT_OBJ_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            data: RefCell::new(NodeData::new(kind)),
            version: Cell::new(next_version()),
            subs: RefCell::new(Vec::new()),
            links: RefCell::new(IndexMap::new()),
            notifying: Cell::new(false),
            snap: RefCell::new(None),
        }))
    }

    pub fn id(&self) -> ObjId {
        self.0.id
    }

    pub fn kind(&self) -> NodeKind {
        self.0.kind
    }

    /// Current version; bumped on every committed mutation in this object's
    /// subtree.
    pub fn version(&self) -> u64 {
        self.0.version.get()
    }

    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ---- reads -------------------------------------------------------

    /// Reads a property; absent keys read as `Unit`.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        let value = self.0.data.borrow().get(&key);
        listeners::notify_read(self, &key, value.as_ref());
        value.unwrap_or(Value::Unit)
    }

    /// Existence check; registers a shape read.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let present = self.0.data.borrow().has(&key.into());
        listeners::notify_read(self, &PropKey::Shape, None);
        present
    }

    /// Own keys; registers a shape read on maps and an enumeration read on
    /// lists.
    pub fn keys(&self) -> Vec<PropKey> {
        let keys = self.0.data.borrow().keys();
        listeners::notify_read(self, &self.enumeration_key(), None);
        keys
    }

    /// Entry count; a length read on lists, a shape read on maps.
    pub fn len(&self) -> usize {
        let len = self.0.data.borrow().len();
        let key = match self.0.kind {
            NodeKind::List => PropKey::Length,
            NodeKind::Map => PropKey::Shape,
        };
        listeners::notify_read(self, &key, None);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All values. On a list this is an enumeration read; on a map it reads
    /// the shape plus every individual property.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// All entries, with the same read registration as [`Obj::values`].
    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        let entries = self.0.data.borrow().entries();
        listeners::notify_read(self, &self.enumeration_key(), None);
        if self.0.kind == NodeKind::Map {
            for (key, value) in &entries {
                listeners::notify_read(self, key, Some(value));
            }
        }
        entries
    }

    fn enumeration_key(&self) -> PropKey {
        match self.0.kind {
            NodeKind::Map => PropKey::Shape,
            NodeKind::List => PropKey::Iter,
        }
    }

    // ---- writes ------------------------------------------------------

    /// Sets a property. Plain nodes are converted into trackable children.
    /// Strictly-equal overwrites are no-ops. Setting a list index past the
    /// end extends the list (intermediate slots read as `Unit`).
    ///
    /// Panics on a key that cannot address this kind of object: an index or
    /// synthetic key on a map, anything but an index on a list.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = convert_value(value.into());

        let (prev, old_len) = {
            let data = self.0.data.borrow();
            (data.get(&key), data.len())
        };
        if let Some(p) = &prev {
            if p.strict_eq(&value) {
                return;
            }
        }
        let added = prev.is_none();

        self.unlink(&key);
        let new_len = {
            let mut data = self.0.data.borrow_mut();
            data.set(&key, value.clone());
            data.len()
        };
        self.link(&key, &value);

        let mut ops: SmallVec<[WriteOp; 3]> = SmallVec::new();
        ops.push(WriteOp {
            key,
            prev,
            new: Some(value),
        });
        if self.0.kind == NodeKind::List {
            if new_len != old_len {
                ops.push(WriteOp {
                    key: PropKey::Length,
                    prev: Some(Value::Int(old_len as i64)),
                    new: Some(Value::Int(new_len as i64)),
                });
                ops.push(WriteOp::shape());
            }
        } else if added {
            ops.push(WriteOp::shape());
        }
        self.commit(&ops);
    }

    /// Appends to a list.
    pub fn push(&self, value: impl Into<Value>) {
        assert_eq!(self.0.kind, NodeKind::List, "push on a map object");
        let index = self.0.data.borrow().len();
        self.set(index, value);
    }

    /// Removes a property. On a map the key disappears; on a list the slot
    /// becomes a `Unit` hole and the length is unchanged. Delivered to write
    /// listeners as a mutation to absent. Returns whether anything was
    /// removed.
    pub fn delete(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        match self.0.kind {
            NodeKind::Map => {
                let prev = self.0.data.borrow_mut().remove(&key);
                let Some(prev) = prev else { return false };
                self.unlink(&key);
                let ops = [
                    WriteOp {
                        key,
                        prev: Some(prev),
                        new: None,
                    },
                    WriteOp::shape(),
                ];
                self.commit(&ops);
                true
            }
            NodeKind::List => {
                let prev = self.0.data.borrow().get(&key);
                let Some(prev) = prev else { return false };
                if prev.strict_eq(&Value::Unit) {
                    return false;
                }
                self.unlink(&key);
                self.0.data.borrow_mut().set(&key, Value::Unit);
                let ops = [
                    WriteOp {
                        key,
                        prev: Some(prev),
                        new: None,
                    },
                    WriteOp::shape(),
                ];
                self.commit(&ops);
                true
            }
        }
    }

    /// Resizes a list. Shrinking drops the tail (and its child links);
    /// growing extends with `Unit`. Delivered as a single length mutation
    /// carrying the previous and new lengths.
    pub fn set_len(&self, new_len: usize) {
        assert_eq!(self.0.kind, NodeKind::List, "set_len on a map object");
        let old_len = self.0.data.borrow().len();
        if new_len == old_len {
            return;
        }
        if new_len < old_len {
            for i in new_len..old_len {
                self.unlink(&PropKey::Index(i));
            }
        }
        {
            let mut data = self.0.data.borrow_mut();
            let NodeData::List(items) = &mut *data else {
                unreachable!()
            };
            items.resize(new_len, Value::Unit);
        }
        let ops = [
            WriteOp {
                key: PropKey::Length,
                prev: Some(Value::Int(old_len as i64)),
                new: Some(Value::Int(new_len as i64)),
            },
            WriteOp::shape(),
        ];
        self.commit(&ops);
    }

    // ---- subscriptions and notification ------------------------------

    /// Subscribes to committed changes. With `notify_on_any_change`, the
    /// callback also fires for mutations propagated from trackable
    /// descendants; without it, only for direct mutations of this object.
    pub fn subscribe<F: Fn() + 'static>(
        &self,
        callback: F,
        notify_on_any_change: bool,
    ) -> Subscription {
        let id = next_sub_id();
        self.0.subs.borrow_mut().push(SubEntry {
            id,
            any_change: notify_on_any_change,
            callback: Rc::new(callback),
        });
        Subscription {
            target: Rc::downgrade(&self.0),
            id,
        }
    }

    fn commit(&self, ops: &[WriteOp]) {
        self.0.version.set(next_version());
        for op in ops {
            listeners::notify_write(self, &op.key, op.prev.as_ref(), op.new.as_ref());
        }
        self.notify_subs(false);
    }

    fn notify_subs(&self, propagated: bool) {
        let active: SmallVec<[Rc<dyn Fn()>; 4]> = self
            .0
            .subs
            .borrow()
            .iter()
            .filter(|entry| !propagated || entry.any_change)
            .map(|entry| entry.callback.clone())
            .collect();
        for callback in active {
            callback();
        }
    }

    /// A trackable descendant committed a mutation: bump our version and
    /// notify any-change subscribers, forwarding further up.
    fn child_changed(&self) {
        if self.0.notifying.get() {
            return;
        }
        self.0.notifying.set(true);
        self.0.version.set(next_version());
        self.notify_subs(true);
        self.0.notifying.set(false);
    }

    fn link(&self, key: &PropKey, value: &Value) {
        if let Value::Tracked(child) = value {
            let weak = Rc::downgrade(&self.0);
            let sub = child.subscribe(
                move || {
                    if let Some(inner) = weak.upgrade() {
                        Obj(inner).child_changed();
                    }
                },
                true,
            );
            self.0.links.borrow_mut().insert(key.clone(), sub);
        }
    }

    fn unlink(&self, key: &PropKey) {
        self.0.links.borrow_mut().swap_remove(key);
    }

    /// Used during conversion of plain nodes: installs an entry without
    /// firing any notifications (the object has no observers yet).
    fn init_entry(&self, key: &PropKey, value: Value) {
        self.link(key, &value);
        self.0.data.borrow_mut().set(key, value);
    }

    // ---- snapshot ----------------------------------------------------

    /// A frozen plain copy of this object's current contents. Cached per
    /// version, so repeated snapshots of an unchanged object are
    /// reference-equal. Cycles and shared references are preserved.
    pub fn snapshot(&self) -> Value {
        let mut memo = HashMap::new();
        self.snap(&mut memo)
    }

    fn snap(&self, memo: &mut HashMap<ObjId, Value>) -> Value {
        if let Some(value) = memo.get(&self.0.id) {
            return value.clone();
        }
        if let Some((version, value)) = &*self.0.snap.borrow() {
            if *version == self.0.version.get() {
                memo.insert(self.0.id, value.clone());
                return value.clone();
            }
        }

        let node = match self.0.kind {
            NodeKind::Map => NodeRef::map(),
            NodeKind::List => NodeRef::list(),
        };
        let value = Value::Node(node.clone());
        memo.insert(self.0.id, value.clone());

        let entries = self.0.data.borrow().entries();
        for (key, child) in entries {
            let copied = match child {
                Value::Tracked(c) => c.snap(memo),
                other => other,
            };
            node.set(key, copied);
        }
        node.freeze();

        *self.0.snap.borrow_mut() = Some((self.0.version.get(), value.clone()));
        value
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: object graphs may be cyclic.
        write!(
            f,
            "Obj({:?}, {:?}, v{})",
            self.0.id,
            self.0.kind,
            self.0.version.get()
        )
    }
}

/// Whether a value is a trackable object.
pub fn is_tracked(value: &Value) -> bool {
    matches!(value, Value::Tracked(_))
}

/// Whether a value would be converted into a trackable object when stored.
pub fn can_track(value: &Value) -> bool {
    matches!(value, Value::Node(_))
}

/// Converts a plain composite into a trackable object graph, like storing it
/// would. Other values pass through.
pub fn track(value: Value) -> Value {
    convert_value(value)
}

fn convert_value(value: Value) -> Value {
    match value {
        Value::Node(node) => {
            let mut memo = HashMap::new();
            Value::Tracked(node_to_obj(&node, &mut memo))
        }
        other => other,
    }
}

fn node_to_obj(node: &NodeRef, memo: &mut HashMap<usize, Obj>) -> Obj {
    if let Some(obj) = memo.get(&node.ptr_id()) {
        return obj.clone();
    }
    let obj = match node.kind() {
        NodeKind::Map => Obj::map(),
        NodeKind::List => Obj::list(),
    };
    memo.insert(node.ptr_id(), obj.clone());
    for (key, child) in node.entries() {
        let converted = match child {
            Value::Node(n) => Value::Tracked(node_to_obj(&n, memo)),
            other => other,
        };
        obj.init_entry(&key, converted);
    }
    obj
}
