//! Per-object change subscriptions.
//!
//! A subscription delivers a synchronous callback whenever the target object
//! commits a mutation. Subscriptions created with `notify_on_any_change` also
//! receive propagated notifications for mutations committed anywhere in the
//! subtree reachable from the target (the store forwards nested changes to
//! ancestors).
//!
//! `Subscription` is an RAII guard: dropping it unsubscribes. The guard holds
//! the target weakly, so a subscription outliving its object is a harmless
//! no-op.

use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::obj::ObjInner;

static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_sub_id() -> u64 {
    NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed)
}

/// A registered callback on one trackable object.
pub(crate) struct SubEntry {
    pub(crate) id: u64,
    /// Also receive notifications propagated from descendants.
    pub(crate) any_change: bool,
    pub(crate) callback: Rc<dyn Fn()>,
}

/// Live change subscription; unsubscribes on drop.
pub struct Subscription {
    pub(crate) target: Weak<ObjInner>,
    pub(crate) id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.target.upgrade() {
            let id = self.id;
            inner.subs.borrow_mut().retain(|entry| entry.id != id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscription(#{})", self.id)
    }
}
