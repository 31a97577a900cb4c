//! Global read/write listener registries.
//!
//! The store notifies these registries on every property read and every
//! committed mutation of any trackable object. Observers hook in here: the
//! access tracker registers a read listener for the duration of one tracked
//! run, and each observer's change router stays registered for the
//! observer's lifetime.
//!
//! Both registries are broadcast sets that must tolerate registration and
//! removal *during* dispatch (a routed change can synchronously re-run an
//! observer, which re-registers its tracking listener). Dispatch therefore
//! iterates over a snapshot of the listener set.
//!
//! Everything is thread-local: the engine is single-threaded cooperative.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::store::Obj;
use crate::value::{PropKey, Value};

/// Called on every property read through a trackable object.
pub(crate) type ReadListener = Rc<dyn Fn(&Obj, &PropKey, Option<&Value>)>;

/// Called after every committed mutation: `(object, key, previous, new)`.
/// `None` means the key was absent (before an insert / after a delete).
pub(crate) type WriteListener = Rc<dyn Fn(&Obj, &PropKey, Option<&Value>, Option<&Value>)>;

thread_local! {
    static NEXT_LISTENER_ID: Cell<u64> = const { Cell::new(0) };
    static READ_LISTENERS: RefCell<Vec<(u64, ReadListener)>> = const { RefCell::new(Vec::new()) };
    static WRITE_LISTENERS: RefCell<Vec<(u64, WriteListener)>> = const { RefCell::new(Vec::new()) };
}

fn next_listener_id() -> u64 {
    NEXT_LISTENER_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    })
}

/// Runs `body` with `listener` receiving every read performed inside it.
///
/// The listener is removed when `body` returns, including by panic, so
/// tracking never leaks into unrelated future reads. Scopes nest: an inner
/// scope's reads are also seen by outer listeners still in scope.
pub(crate) fn track_reads<R>(listener: ReadListener, body: impl FnOnce() -> R) -> R {
    struct Scope(u64);
    impl Drop for Scope {
        fn drop(&mut self) {
            let id = self.0;
            READ_LISTENERS.with(|l| l.borrow_mut().retain(|(lid, _)| *lid != id));
        }
    }

    let id = next_listener_id();
    READ_LISTENERS.with(|l| l.borrow_mut().push((id, listener)));
    let _scope = Scope(id);
    body()
}

/// Keeps a write listener registered; dropping unregisters it.
pub(crate) struct WriteGuard(u64);

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let id = self.0;
        WRITE_LISTENERS.with(|l| l.borrow_mut().retain(|(lid, _)| *lid != id));
    }
}

pub(crate) fn register_write_listener(listener: WriteListener) -> WriteGuard {
    let id = next_listener_id();
    WRITE_LISTENERS.with(|l| l.borrow_mut().push((id, listener)));
    WriteGuard(id)
}

pub(crate) fn notify_read(obj: &Obj, key: &PropKey, value: Option<&Value>) {
    let active: SmallVec<[ReadListener; 4]> =
        READ_LISTENERS.with(|l| l.borrow().iter().map(|(_, f)| f.clone()).collect());
    for listener in active {
        listener(obj, key, value);
    }
}

pub(crate) fn notify_write(obj: &Obj, key: &PropKey, prev: Option<&Value>, new: Option<&Value>) {
    let active: SmallVec<[WriteListener; 4]> =
        WRITE_LISTENERS.with(|l| l.borrow().iter().map(|(_, f)| f.clone()).collect());
    for listener in active {
        listener(obj, key, prev, new);
    }
}
