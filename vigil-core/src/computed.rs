//! Derived trackable values.
//!
//! A [`Computed`] wraps an observer whose output is written into a trackable
//! cell. Reading [`Computed::value`] goes through the store, so other
//! observers (and other computeds) can depend on it like any trackable
//! property; recomputation cascades through the ordinary observation
//! machinery.
//!
//! Dropping a `Computed` stops its observer; the cell keeps its last value.

use crate::error::{BoxError, Result};
use crate::observe::{observe, Mode, ObserveHandle};
use crate::store::Obj;
use crate::value::Value;

pub struct Computed {
    cell: Obj,
    handle: ObserveHandle,
}

/// Creates a derived value recomputed whenever a dependency of `func`
/// changes. Like [`observe`], the initial computation runs before this
/// returns and its errors propagate.
pub fn computed<F>(func: F, mode: Mode) -> Result<Computed>
where
    F: FnMut() -> std::result::Result<Value, BoxError> + 'static,
{
    let cell = Obj::map();
    let sink = cell.clone();
    let handle = observe(
        func,
        move |v| {
            sink.set("value", v.clone());
            Ok(())
        },
        mode,
    )?;
    Ok(Computed { cell, handle })
}

impl Computed {
    /// The current value. This is a tracked read: observers running while
    /// reading it will re-run when the computed recomputes.
    pub fn value(&self) -> Value {
        self.cell.get("value")
    }

    /// The trackable cell holding the value under the `"value"` key.
    pub fn cell(&self) -> &Obj {
        &self.cell
    }

    /// Lifecycle control of the underlying observer.
    pub fn handle(&self) -> &ObserveHandle {
        &self.handle
    }
}

impl std::fmt::Debug for Computed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("cell", &self.cell)
            .field("handle", &self.handle)
            .finish()
    }
}
