//! Working set: the per-query arena of in-flight results
//!
//! Every candidate result flowing through a stage tree lives in the
//! working set and is referred to by a [`WorkingSetId`] handle. Stages pass
//! handles upward; nothing holds a direct reference to an entry across a
//! `work()` call.
//!
//! Handles carry a generation. Freeing an entry bumps its slot's
//! generation, so a stale handle can never alias a later allocation.

mod common;
mod entry;
mod set;

pub use common::{
    allocate_status_member, fetch_and_invalidate, force_fetch_all, is_status_document,
    member_status,
};
pub use entry::{ComputedData, ComputedKind, EntryState, IndexKeyData, WorkingSetEntry};
pub use set::{WorkingSet, WorkingSetId};
