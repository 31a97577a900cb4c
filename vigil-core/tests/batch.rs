//! Batch scopes: coalescing synchronous re-runs across grouped mutations.

use std::cell::Cell;
use std::rc::Rc;

use vigil_core::{batch, in_batch, observe, Mode, Obj, Value};

#[test]
fn mutations_in_a_batch_coalesce_into_one_rerun() {
    let state = Obj::map();
    state.set("v", 0i64);
    let count = Rc::new(Cell::new(0));

    let s = state.clone();
    let c = count.clone();
    let handle = observe(
        move || Ok(s.get("v")),
        move |_| {
            c.set(c.get() + 1);
            Ok(())
        },
        Mode::Sync,
    )
    .unwrap();
    assert_eq!(count.get(), 1);

    batch(|| {
        state.set("v", 1i64);
        state.set("v", 2i64);
        assert_eq!(count.get(), 1);
    });
    assert_eq!(count.get(), 2);

    // Nested scopes flush only at the outermost exit.
    batch(|| {
        state.set("v", 3i64);
        state.set("v", 4i64);
        batch(|| {
            state.set("v", 5i64);
            state.set("v", 6i64);
            assert_eq!(count.get(), 2);
        });
        assert_eq!(count.get(), 2);
    });
    assert_eq!(count.get(), 3);

    handle.stop();
}

#[test]
fn in_batch_reflects_scope_nesting() {
    assert!(!in_batch());
    batch(|| {
        assert!(in_batch());
        batch(|| assert!(in_batch()));
        assert!(in_batch());
    });
    assert!(!in_batch());
}

#[test]
fn batch_returns_the_body_value() {
    let state = Obj::map();
    let n = batch(|| {
        state.set("v", 1i64);
        42
    });
    assert_eq!(n, 42);
}

#[test]
fn two_observers_each_rerun_once_per_batch() {
    let state = Obj::map();
    state.set("a", 0i64);
    state.set("b", 0i64);
    let count_a = Rc::new(Cell::new(0));
    let count_b = Rc::new(Cell::new(0));

    let s = state.clone();
    let c = count_a.clone();
    let ha = observe(
        move || Ok(s.get("a")),
        move |_| {
            c.set(c.get() + 1);
            Ok(())
        },
        Mode::Sync,
    )
    .unwrap();

    let s = state.clone();
    let c = count_b.clone();
    let hb = observe(
        move || Ok(s.get("b")),
        move |_| {
            c.set(c.get() + 1);
            Ok(())
        },
        Mode::Sync,
    )
    .unwrap();

    batch(|| {
        state.set("a", 1i64);
        state.set("b", 1i64);
        state.set("a", 2i64);
    });

    assert_eq!(count_a.get(), 2);
    assert_eq!(count_b.get(), 2);

    ha.stop();
    hb.stop();
}

#[test]
fn stopping_inside_a_batch_cancels_the_pending_rerun() {
    let state = Obj::map();
    state.set("v", 0i64);
    let count = Rc::new(Cell::new(0));

    let s = state.clone();
    let c = count.clone();
    let handle = observe(
        move || Ok(s.get("v")),
        move |_| {
            c.set(c.get() + 1);
            Ok(())
        },
        Mode::Sync,
    )
    .unwrap();

    batch(|| {
        state.set("v", 1i64);
        handle.stop();
    });

    assert_eq!(count.get(), 1);
}

#[test]
fn a_failing_observer_does_not_break_the_flush_for_others() {
    let state = Obj::map();
    state.set("v", 0i64);
    let count = Rc::new(Cell::new(0));

    // Registered first, so its job flushes first and fails there.
    let s = state.clone();
    let failing = observe(
        move || {
            if s.get("v").as_int() == Some(1) {
                return Err("bad state".into());
            }
            Ok(s.get("v"))
        },
        |_| Ok(()),
        Mode::Sync,
    )
    .unwrap();

    let s = state.clone();
    let c = count.clone();
    let healthy = observe(
        move || Ok(s.get("v")),
        move |_| {
            c.set(c.get() + 1);
            Ok(())
        },
        Mode::Sync,
    )
    .unwrap();
    assert_eq!(count.get(), 1);

    batch(|| {
        state.set("v", 1i64);
    });
    // The failing observer's error is logged and swallowed; the healthy one
    // still re-ran.
    assert_eq!(count.get(), 2);

    failing.stop();
    healthy.stop();
}

#[test]
fn writes_from_a_batched_rerun_propagate_after_the_flush() {
    // Observer A writes "b" when it re-runs; observer B depends on "b".
    let state = Obj::map();
    state.set("a", 0i64);
    state.set("b", 0i64);
    let seen_b = Rc::new(Cell::new(-1i64));

    let s = state.clone();
    let ha = observe(
        move || Ok(s.get("a")),
        {
            let s = state.clone();
            move |v| {
                if let Value::Int(n) = v {
                    s.set("b", *n);
                }
                Ok(())
            }
        },
        Mode::Sync,
    )
    .unwrap();

    let s = state.clone();
    let sb = seen_b.clone();
    let hb = observe(
        move || Ok(s.get("b")),
        move |v| {
            sb.set(v.as_int().unwrap());
            Ok(())
        },
        Mode::Sync,
    )
    .unwrap();

    batch(|| {
        state.set("a", 7i64);
        assert_eq!(seen_b.get(), 0);
    });
    // A's re-run at flush wrote b = 7, which re-ran B in turn.
    assert_eq!(seen_b.get(), 7);

    ha.stop();
    hb.stop();
}
