//! vigil-core: fine-grained observation over trackable state.
//!
//! The crate has two halves. The [`store`] provides trackable maps and
//! lists: identity-keyed objects whose reads and committed mutations are
//! visible to listeners, with versioning and change propagation through
//! nested trackable children. The [`observe`] engine builds on that surface:
//! it runs a function under read tracking, routes later mutations against
//! the recorded dependencies, and delivers the function's output to a
//! consumer whenever a cycle-safe structural diff says it actually changed,
//! splicing unchanged subtrees so consumers keep reference equality.
//!
//! # Example
//!
//! ```
//! use vigil_core::{observe, Mode, Obj};
//!
//! let state = Obj::map();
//! state.set("count", 0i64);
//!
//! let s = state.clone();
//! let handle = observe(
//!     move || Ok(s.get("count")),
//!     |v| {
//!         println!("count is now {v:?}");
//!         Ok(())
//!     },
//!     Mode::Sync,
//! )?;
//!
//! state.set("count", 1i64); // re-runs and delivers inline
//! state.set("count", 1i64); // no-op write, nothing happens
//! handle.stop();
//! # Ok::<(), vigil_core::Error>(())
//! ```
//!
//! # Scheduling
//!
//! Synchronous observers re-run inline; [`batch`] coalesces them over a
//! scope. Deferred observers queue and run at [`flush_deferred`], which the
//! host calls at its task boundary.
//!
//! # Threading
//!
//! The engine is single-threaded cooperative: all registries live in
//! thread-locals, and trackable objects are `Rc`-based. Each thread gets an
//! independent universe of objects and observers.

pub mod computed;
pub mod error;
pub mod materialize;
pub mod observe;
pub mod scheduler;
pub mod store;
pub mod value;

pub use computed::{computed, Computed};
pub use error::{BoxError, Error, Result};
pub use materialize::materialize;
pub use observe::{observe, Mode, ObserveHandle};
pub use scheduler::{batch, flush_deferred, in_batch};
pub use store::{can_track, is_tracked, track, Obj, ObjId, Subscription};
pub use value::{NodeKind, NodeRef, OpaqueRef, PropKey, Value};
