//! The trackable state store.
//!
//! This module provides the full capability surface the observation engine
//! builds on:
//!
//! - [`Obj`]: identity-keyed trackable maps and lists with versioning,
//!   deep conversion of plain composites, and change propagation through
//!   nested trackable children.
//! - [`Subscription`]: RAII per-object change subscriptions.
//! - global read/write listener registries (crate-internal), used by the
//!   engine's access tracker and change routers.
//! - [`Obj::snapshot`]: frozen, cached plain copies of trackable state.
//!
//! The engine in [`crate::observe`] never touches object internals; it only
//! uses what is exported here.

pub(crate) mod listeners;
mod obj;
mod subscription;

pub use obj::{can_track, is_tracked, track, Obj, ObjId};
pub use subscription::Subscription;
