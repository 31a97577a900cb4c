//! Re-run scheduling: batch scopes and the deferred queue.
//!
//! [`batch`] opens a scope in which synchronous observers coalesce: instead
//! of re-running on every mutation, each dirty observer is queued once (by
//! observer id) and runs when the outermost scope closes. Scopes nest; only
//! the outermost close flushes. If the batched closure panics, the pending
//! queue is kept for the next flush rather than run during unwinding.
//!
//! Deferred observers never run inline. They queue onto a thread-local FIFO
//! that the host drains at its own boundary by calling [`flush_deferred`],
//! the moral equivalent of a microtask checkpoint in an event loop. Work
//! queued while flushing is drained in the same call.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use indexmap::IndexMap;

type Job = Box<dyn FnOnce()>;

thread_local! {
    static BATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
    static BATCH_PENDING: RefCell<IndexMap<u64, Job>> = RefCell::new(IndexMap::new());
    static DEFERRED: RefCell<VecDeque<Job>> = const { RefCell::new(VecDeque::new()) };
}

/// Whether a batch scope is currently open.
pub fn in_batch() -> bool {
    BATCH_DEPTH.with(|d| d.get() > 0)
}

/// Runs `body` inside a batch scope. Synchronous observers dirtied during
/// the scope re-run once, after the outermost scope closes, in the order
/// they were first dirtied.
pub fn batch<R>(body: impl FnOnce() -> R) -> R {
    struct Depth;
    impl Drop for Depth {
        fn drop(&mut self) {
            BATCH_DEPTH.with(|d| d.set(d.get() - 1));
        }
    }

    BATCH_DEPTH.with(|d| d.set(d.get() + 1));
    let result = {
        let _depth = Depth;
        body()
    };
    if !in_batch() {
        flush_batched();
    }
    result
}

/// Queues a batched re-run for the observer with the given id. A second
/// queue for the same id while one is pending is dropped.
pub(crate) fn queue_batched(observer_id: u64, job: Job) {
    BATCH_PENDING.with(|p| {
        p.borrow_mut().entry(observer_id).or_insert(job);
    });
}

/// Drops a pending batched re-run, if any. Used when an observer stops
/// inside a batch scope.
pub(crate) fn cancel_batched(observer_id: u64) {
    BATCH_PENDING.with(|p| {
        p.borrow_mut().shift_remove(&observer_id);
    });
}

fn flush_batched() {
    loop {
        // Pop before running: a job may queue further work, which joins
        // this same flush.
        let job = BATCH_PENDING.with(|p| {
            let mut pending = p.borrow_mut();
            if pending.is_empty() {
                None
            } else {
                pending.shift_remove_index(0).map(|(_, job)| job)
            }
        });
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}

/// Queues work for the next [`flush_deferred`].
pub(crate) fn defer(job: Job) {
    DEFERRED.with(|q| q.borrow_mut().push_back(job));
}

/// Drains the deferred queue. Observers in deferred mode run their pending
/// re-runs here; the host calls this at its task boundary. Jobs queued
/// during the drain are drained too.
pub fn flush_deferred() {
    loop {
        let job = DEFERRED.with(|q| q.borrow_mut().pop_front());
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}
