//! The observation engine.
//!
//! [`observe`] runs a tracked function once, records every trackable
//! property it reads, and re-runs it whenever a recorded dependency changes.
//! After each run the produced value is structurally compared against the
//! previous one; the consumer is called only when something actually
//! differed, with unchanged subtrees spliced so reference equality is
//! preserved across deliveries.
//!
//! Three kinds of dependency are maintained per observer:
//!
//! - per-property deps, recorded by the access tracker and matched by the
//!   change router against committed writes;
//! - whole-object promotions (enumeration, list iteration), subscribed via
//!   the store's any-change subscriptions;
//! - trackable objects reachable from the produced value, subscribed the
//!   same way and reconciled between runs.
//!
//! # Re-run scheduling
//!
//! [`Mode::Sync`] observers re-run inline on the mutating call, except
//! inside a [`crate::scheduler::batch`] scope, where dirty observers
//! coalesce and run at scope exit. [`Mode::Deferred`] observers coalesce
//! onto the deferred queue and run at the next
//! [`crate::scheduler::flush_deferred`]; [`ObserveHandle::sync`] forces a
//! pending deferred re-run early.
//!
//! # Failures
//!
//! Errors from the tracked function or the consumer propagate out of
//! [`observe`] and [`ObserveHandle::restart`]. On automatic re-runs there
//! is no caller to return to, so the error is logged and the observer stays
//! alive with whatever dependencies the failed run recorded.
//!
//! Dropping the handle stops the observer.

mod diff;
mod reconcile;
mod router;
mod tracker;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::{BoxError, Error, Result};
use crate::scheduler;
use crate::store::listeners::{self, ReadListener, WriteListener};
use crate::store::{Obj, ObjId, Subscription};
use crate::value::Value;

use diff::CompareResult;
use tracker::{DepMap, PromotedMap};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(0);

/// When re-runs happen relative to the mutation that caused them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Re-run inline (or at batch scope exit).
    Sync,
    /// Coalesce onto the deferred queue, drained by
    /// [`crate::scheduler::flush_deferred`].
    Deferred,
}

type TrackedFn = Box<dyn FnMut() -> std::result::Result<Value, BoxError>>;
type ConsumeFn = Box<dyn FnMut(&Value) -> std::result::Result<(), BoxError>>;

struct ObserverInner {
    id: u64,
    mode: Mode,
    func: RefCell<TrackedFn>,
    consume: RefCell<ConsumeFn>,
    /// Per-property deps from the latest run.
    deps: RefCell<DepMap>,
    /// Whole-object subscriptions (promoted + reachable from the result).
    subs: RefCell<IndexMap<ObjId, Subscription>>,
    prev: RefCell<Option<Value>>,
    /// Versions the result's trackable objects had at the previous run.
    prev_versions: RefCell<IndexMap<ObjId, u64>>,
    stopped: Cell<bool>,
    /// Deferred mode: a re-run is queued and not yet delivered.
    triggered: Cell<bool>,
    /// Re-entrancy guard: writes performed by the tracked function itself
    /// do not re-trigger the run that is making them.
    running: Cell<bool>,
    /// The commit that last triggered a re-run, as `(object, version)`. One
    /// commit can carry several ops (a key write plus the shape op it
    /// implies); later ops of an already-routed commit are skipped.
    routed: Cell<Option<(ObjId, u64)>>,
    write_guard: RefCell<Option<listeners::WriteGuard>>,
}

/// Observes `func`: runs it now and on every relevant change, delivering
/// distinct results to `consume`.
///
/// The initial run happens before this returns; its errors (and the
/// consumer's) propagate. Returns a handle controlling the observer's
/// lifecycle; dropping it stops observation.
pub fn observe<F, C>(func: F, consume: C, mode: Mode) -> Result<ObserveHandle>
where
    F: FnMut() -> std::result::Result<Value, BoxError> + 'static,
    C: FnMut(&Value) -> std::result::Result<(), BoxError> + 'static,
{
    let inner = Rc::new(ObserverInner {
        id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
        mode,
        func: RefCell::new(Box::new(func)),
        consume: RefCell::new(Box::new(consume)),
        deps: RefCell::new(DepMap::new()),
        subs: RefCell::new(IndexMap::new()),
        prev: RefCell::new(None),
        prev_versions: RefCell::new(IndexMap::new()),
        stopped: Cell::new(false),
        triggered: Cell::new(false),
        running: Cell::new(false),
        routed: Cell::new(None),
        write_guard: RefCell::new(None),
    });
    register_router(&inner);
    run(&inner)?;
    Ok(ObserveHandle { inner })
}

/// Installs the observer's write listener: every committed store mutation
/// is routed against the recorded per-property deps.
fn register_router(inner: &Rc<ObserverInner>) {
    let weak = Rc::downgrade(inner);
    let listener: WriteListener = Rc::new(move |obj, key, prev, new| {
        let Some(inner) = weak.upgrade() else { return };
        if inner.stopped.get() {
            return;
        }
        let commit = (obj.id(), obj.version());
        if inner.routed.get() == Some(commit) {
            return;
        }
        let hit = router::should_trigger(&inner.deps.borrow(), obj, key, prev, new);
        if hit {
            inner.routed.set(Some(commit));
            trigger(&inner);
        }
    });
    *inner.write_guard.borrow_mut() = Some(listeners::register_write_listener(listener));
}

fn trigger(inner: &Rc<ObserverInner>) {
    if inner.stopped.get() || inner.running.get() {
        return;
    }
    match inner.mode {
        Mode::Sync => {
            if scheduler::in_batch() {
                let weak = Rc::downgrade(inner);
                scheduler::queue_batched(
                    inner.id,
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            run_logged(&inner);
                        }
                    }),
                );
            } else {
                run_logged(inner);
            }
        }
        Mode::Deferred => {
            if inner.triggered.replace(true) {
                return;
            }
            let weak = Rc::downgrade(inner);
            scheduler::defer(Box::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                // sync() may have delivered this re-run already.
                if inner.triggered.get() {
                    run_logged(&inner);
                    inner.triggered.set(false);
                }
            }));
        }
    }
}

/// Automatic re-run: errors have no caller to reach, so log and keep going.
fn run_logged(inner: &Rc<ObserverInner>) {
    if inner.stopped.get() {
        return;
    }
    if let Err(err) = run(inner) {
        tracing::error!(observer = inner.id, error = %err, "observer re-run failed");
    }
}

fn run(inner: &Rc<ObserverInner>) -> Result<()> {
    struct Running(Rc<ObserverInner>);
    impl Drop for Running {
        fn drop(&mut self) {
            self.0.running.set(false);
        }
    }
    inner.running.set(true);
    let _running = Running(inner.clone());

    inner.deps.borrow_mut().clear();
    let promoted: Rc<RefCell<PromotedMap>> = Rc::new(RefCell::new(IndexMap::new()));

    let result = {
        let weak = Rc::downgrade(inner);
        let promoted = promoted.clone();
        let listener: ReadListener = Rc::new(move |obj, key, _value| {
            if let Some(inner) = weak.upgrade() {
                tracker::record_read(
                    &mut inner.deps.borrow_mut(),
                    &mut promoted.borrow_mut(),
                    obj,
                    key,
                );
            }
        });
        listeners::track_reads(listener, || (inner.func.borrow_mut())())
    }
    .map_err(Error::Tracked)?;

    // Whole-object set: promoted by the tracker, plus every trackable
    // reachable from the result.
    let collected = reconcile::collect_tracked(&result);
    let mut reachable: IndexMap<ObjId, Obj> = IndexMap::new();
    for (id, obj) in promoted.borrow().iter() {
        reachable.insert(*id, obj.clone());
    }
    let mut versions = IndexMap::new();
    for (id, (obj, version)) in &collected {
        versions.insert(*id, *version);
        reachable.insert(*id, obj.clone());
    }

    {
        let weak = Rc::downgrade(inner);
        let mut subs = inner.subs.borrow_mut();
        reconcile::reconcile_subs(&mut subs, &reachable, |obj| {
            let weak = weak.clone();
            obj.subscribe(
                move || {
                    if let Some(inner) = weak.upgrade() {
                        trigger(&inner);
                    }
                },
                true,
            )
        });
    }
    // Whole-object subscriptions supersede per-property deps.
    inner
        .deps
        .borrow_mut()
        .retain(|id, _| !reachable.contains_key(id));

    let cmp = {
        let prev = inner.prev.borrow();
        let prev_versions = inner.prev_versions.borrow();
        diff::compare(&result, prev.as_ref(), &prev_versions)
    };
    *inner.prev_versions.borrow_mut() = versions;
    *inner.prev.borrow_mut() = Some(result.clone());

    if cmp == CompareResult::Different {
        (inner.consume.borrow_mut())(&result).map_err(Error::Consume)?;
    }
    Ok(())
}

/// Lifecycle control for one observer. Dropping it stops the observer.
pub struct ObserveHandle {
    inner: Rc<ObserverInner>,
}

impl ObserveHandle {
    /// Delivers a pending deferred re-run now, without waiting for the
    /// flush. `false` if the observer is synchronous or nothing is pending.
    pub fn sync(&self) -> bool {
        if self.inner.mode == Mode::Sync {
            return false;
        }
        if !self.inner.triggered.get() {
            return false;
        }
        run_logged(&self.inner);
        self.inner.triggered.set(false);
        true
    }

    /// Stops observing: unregisters the router, drops all subscriptions and
    /// recorded deps, and cancels pending re-runs. `false` if already
    /// stopped. The last produced value is kept for comparison after a
    /// [`ObserveHandle::restart`].
    pub fn stop(&self) -> bool {
        if self.inner.stopped.replace(true) {
            return false;
        }
        self.inner.triggered.set(false);
        scheduler::cancel_batched(self.inner.id);
        *self.inner.write_guard.borrow_mut() = None;
        self.inner.subs.borrow_mut().clear();
        self.inner.deps.borrow_mut().clear();
        true
    }

    /// Starts a stopped observer again, running it immediately. The run's
    /// errors propagate, like the initial run's. `Ok(false)` if the
    /// observer was not stopped.
    pub fn restart(&self) -> Result<bool> {
        if !self.inner.stopped.get() {
            return Ok(false);
        }
        register_router(&self.inner);
        self.inner.stopped.set(false);
        run(&self.inner)?;
        Ok(true)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }
}

impl std::fmt::Debug for ObserveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserveHandle")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("stopped", &self.inner.stopped.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_run_error_propagates() {
        let result = observe(
            || Err("boom".into()),
            |_| Ok(()),
            Mode::Sync,
        );
        match result {
            Err(Error::Tracked(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected tracked error, got {other:?}"),
        }
    }

    #[test]
    fn initial_consume_error_propagates() {
        let result = observe(
            || Ok(Value::Int(1)),
            |_| Err("nope".into()),
            Mode::Sync,
        );
        assert!(matches!(result, Err(Error::Consume(_))));
    }

    #[test]
    fn stop_is_idempotent_and_reported() {
        let handle = observe(|| Ok(Value::Int(1)), |_| Ok(()), Mode::Sync).unwrap();
        assert!(!handle.is_stopped());
        assert!(handle.stop());
        assert!(handle.is_stopped());
        assert!(!handle.stop());
    }

    #[test]
    fn restart_requires_stopped() {
        let handle = observe(|| Ok(Value::Int(1)), |_| Ok(()), Mode::Sync).unwrap();
        assert_eq!(handle.restart().unwrap(), false);
        handle.stop();
        assert_eq!(handle.restart().unwrap(), true);
        assert!(!handle.is_stopped());
    }

    #[test]
    fn sync_on_a_sync_observer_is_false() {
        let handle = observe(|| Ok(Value::Int(1)), |_| Ok(()), Mode::Sync).unwrap();
        assert!(!handle.sync());
    }
}
