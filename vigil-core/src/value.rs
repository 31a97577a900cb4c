//! Value Model
//!
//! Everything the engine observes, diffs, and materializes is a `Value`:
//! a dynamically typed tree of primitives, plain composite nodes, trackable
//! objects, and opaque escape-hatch references.
//!
//! # Identity vs. value equality
//!
//! Equality follows the source system's strict-equality semantics:
//!
//! - Primitives compare by value. `Float` uses IEEE comparison, so
//!   `NaN != NaN` — this is deliberate and the diff engine depends on it.
//! - `Node`, `Tracked`, and `Opaque` compare by identity only. Two nodes
//!   with identical contents are *not* equal.
//! - `Int` and `Float` never compare equal across variants.
//!
//! # Plain nodes
//!
//! A `NodeRef` is an identity-carrying plain map or list with interior
//! mutability. The diff engine freezes nodes after comparing them; writes to
//! a frozen node are silently ignored, mirroring non-strict assignment to a
//! frozen object in the source system.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::store::Obj;

/// A property key on a trackable object or plain node.
///
/// `Shape` and `Iter` are synthetic keys: reads that depend on the key set
/// itself ("has", own-key enumeration) normalize to `Shape`, and list
/// enumeration normalizes to `Iter` (which the access tracker turns into
/// whole-object tracking).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PropKey {
    /// A named map property.
    Key(Rc<str>),
    /// A list element index.
    Index(usize),
    /// A list's length.
    Length,
    /// Synthetic: existence / own-key-set reads.
    Shape,
    /// Synthetic: list enumeration reads.
    Iter,
}

impl From<&str> for PropKey {
    fn from(key: &str) -> Self {
        PropKey::Key(Rc::from(key))
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Key(k) => write!(f, "{k}"),
            PropKey::Index(i) => write!(f, "{i}"),
            PropKey::Length => write!(f, "length"),
            PropKey::Shape => write!(f, "<shape>"),
            PropKey::Iter => write!(f, "<iter>"),
        }
    }
}

/// The shape of a composite value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    Map,
    List,
}

/// Storage shared by plain nodes and trackable objects.
pub(crate) enum NodeData {
    Map(IndexMap<Rc<str>, Value>),
    List(Vec<Value>),
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Map => NodeData::Map(IndexMap::new()),
            NodeKind::List => NodeData::List(Vec::new()),
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeData::Map(_) => NodeKind::Map,
            NodeData::List(_) => NodeKind::List,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            NodeData::Map(m) => m.len(),
            NodeData::List(l) => l.len(),
        }
    }

    pub(crate) fn get(&self, key: &PropKey) -> Option<Value> {
        match (self, key) {
            (NodeData::Map(m), PropKey::Key(k)) => m.get(k).cloned(),
            (NodeData::List(l), PropKey::Index(i)) => l.get(*i).cloned(),
            _ => None,
        }
    }

    pub(crate) fn has(&self, key: &PropKey) -> bool {
        match (self, key) {
            (NodeData::Map(m), PropKey::Key(k)) => m.contains_key(k),
            (NodeData::List(l), PropKey::Index(i)) => *i < l.len(),
            _ => false,
        }
    }

    /// Inserts or replaces an entry. A list index past the end extends the
    /// list with `Unit` slots first.
    pub(crate) fn set(&mut self, key: &PropKey, value: Value) {
        match (self, key) {
            (NodeData::Map(m), PropKey::Key(k)) => {
                m.insert(k.clone(), value);
            }
            (NodeData::List(l), PropKey::Index(i)) => {
                if *i < l.len() {
                    l[*i] = value;
                } else {
                    while l.len() < *i {
                        l.push(Value::Unit);
                    }
                    l.push(value);
                }
            }
            _ => panic!("property key does not match node kind"),
        }
    }

    pub(crate) fn remove(&mut self, key: &PropKey) -> Option<Value> {
        match (self, key) {
            (NodeData::Map(m), PropKey::Key(k)) => m.shift_remove(k),
            _ => None,
        }
    }

    pub(crate) fn keys(&self) -> Vec<PropKey> {
        match self {
            NodeData::Map(m) => m.keys().map(|k| PropKey::Key(k.clone())).collect(),
            NodeData::List(l) => (0..l.len()).map(PropKey::Index).collect(),
        }
    }

    pub(crate) fn entries(&self) -> Vec<(PropKey, Value)> {
        match self {
            NodeData::Map(m) => m
                .iter()
                .map(|(k, v)| (PropKey::Key(k.clone()), v.clone()))
                .collect(),
            NodeData::List(l) => l
                .iter()
                .enumerate()
                .map(|(i, v)| (PropKey::Index(i), v.clone()))
                .collect(),
        }
    }
}

pub(crate) struct NodeCell {
    frozen: Cell<bool>,
    data: RefCell<NodeData>,
}

/// An identity-carrying plain composite node (map or list).
///
/// Cloning a `NodeRef` clones the handle, not the contents; two clones refer
/// to the same node and compare equal.
#[derive(Clone)]
pub struct NodeRef(pub(crate) Rc<NodeCell>);

impl NodeRef {
    pub fn map() -> Self {
        Self::new(NodeKind::Map)
    }

    pub fn list() -> Self {
        Self::new(NodeKind::List)
    }

    fn new(kind: NodeKind) -> Self {
        NodeRef(Rc::new(NodeCell {
            frozen: Cell::new(false),
            data: RefCell::new(NodeData::new(kind)),
        }))
    }

    pub fn kind(&self) -> NodeKind {
        self.0.data.borrow().kind()
    }

    pub fn len(&self) -> usize {
        self.0.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: impl Into<PropKey>) -> Option<Value> {
        self.0.data.borrow().get(&key.into())
    }

    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        self.0.data.borrow().has(&key.into())
    }

    /// Inserts or replaces an entry. Ignored on a frozen node.
    ///
    /// Panics on a key that cannot address this kind of node: an index or
    /// synthetic key on a map, anything but an index on a list.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) {
        if self.0.frozen.get() {
            return;
        }
        self.0.data.borrow_mut().set(&key.into(), value.into());
    }

    /// Appends to a list node. Ignored on a frozen node.
    pub fn push(&self, value: impl Into<Value>) {
        let index = self.len();
        self.set(index, value);
    }

    pub fn keys(&self) -> Vec<PropKey> {
        self.0.data.borrow().keys()
    }

    pub fn entries(&self) -> Vec<(PropKey, Value)> {
        self.0.data.borrow().entries()
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    pub(crate) fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity while the node is alive. Only valid as a map key for
    /// the duration of a traversal holding the graph.
    pub(crate) fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<NodeCell> {
        Rc::downgrade(&self.0)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: node graphs may be cyclic.
        write!(f, "NodeRef({:?} @ {:#x}", self.kind(), self.ptr_id())?;
        if self.is_frozen() {
            write!(f, ", frozen")?;
        }
        write!(f, ")")
    }
}

/// A reference the engine must never track, copy, or descend into.
#[derive(Clone)]
pub struct OpaqueRef(Rc<dyn Any>);

impl OpaqueRef {
    pub fn new<T: 'static>(value: T) -> Self {
        OpaqueRef(Rc::new(value))
    }

    pub fn ptr_eq(&self, other: &OpaqueRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for OpaqueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueRef({:p})", Rc::as_ptr(&self.0))
    }
}

/// A dynamically typed observable value.
#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A plain composite node, compared by identity.
    Node(NodeRef),
    /// A trackable object owned by the store.
    Tracked(Obj),
    /// Passed through all machinery untouched.
    Opaque(OpaqueRef),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn opaque<T: 'static>(value: T) -> Self {
        Value::Opaque(OpaqueRef::new(value))
    }

    /// Strict equality: value for primitives, identity for references.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // NaN is never equal to itself, by design.
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            (Value::Tracked(a), Value::Tracked(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_tracked(&self) -> Option<&Obj> {
        match self {
            Value::Tracked(o) => Some(o),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Node(n) => write!(f, "{n:?}"),
            Value::Tracked(o) => write!(f, "Tracked({:?})", o.id()),
            Value::Opaque(o) => write!(f, "{o:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}

impl From<NodeRef> for Value {
    fn from(v: NodeRef) -> Self {
        Value::Node(v)
    }
}

impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Value::Tracked(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_compare_by_value() {
        assert_eq!(Value::Int(1), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Int(2));
        assert_eq!(Value::str("a"), Value::str("a"));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn nodes_compare_by_identity() {
        let a = NodeRef::map();
        a.set("x", 1i64);
        let b = NodeRef::map();
        b.set("x", 1i64);

        assert_ne!(Value::Node(a.clone()), Value::Node(b));
        assert_eq!(Value::Node(a.clone()), Value::Node(a));
    }

    #[test]
    fn list_set_extends_with_unit() {
        let l = NodeRef::list();
        l.set(2usize, 5i64);

        assert_eq!(l.len(), 3);
        assert_eq!(l.get(0usize), Some(Value::Unit));
        assert_eq!(l.get(1usize), Some(Value::Unit));
        assert_eq!(l.get(2usize), Some(Value::Int(5)));
    }

    #[test]
    #[should_panic(expected = "property key does not match node kind")]
    fn setting_a_named_key_on_a_list_panics() {
        NodeRef::list().set("a", 1i64);
    }

    #[test]
    fn frozen_node_ignores_writes() {
        let n = NodeRef::map();
        n.set("a", 1i64);
        n.freeze();
        n.set("a", 2i64);
        n.set("b", 3i64);

        assert_eq!(n.get("a"), Some(Value::Int(1)));
        assert!(!n.has("b"));
    }

    #[test]
    fn map_keys_preserve_insertion_order() {
        let n = NodeRef::map();
        n.set("b", 1i64);
        n.set("a", 2i64);

        let keys = n.keys();
        assert_eq!(keys, vec![PropKey::from("b"), PropKey::from("a")]);
    }

    #[test]
    fn opaque_compares_by_identity() {
        let a = Value::opaque(42u32);
        let b = Value::opaque(42u32);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
