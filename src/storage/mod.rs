//! Storage collaborator interfaces for the execution engine
//!
//! The execution engine never owns documents or indexes. It reaches them
//! through two narrow traits:
//!
//! - [`RecordStore`]: record fetch, existence checks and ordered scans
//! - [`IndexAccess`]: ordered `(key, record id)` seeks over one index
//!
//! Positions handed out by either trait are only meaningful while the
//! caller holds a transactional context. Stages re-derive them from the
//! last value they returned after every yield.
//!
//! In-memory implementations are provided for embedding and for tests.

mod index;
mod memory;
mod record;
mod store;

pub use index::{IndexAccess, IndexEntry, IndexKey, KeyRange, SharedIndex};
pub use memory::{MemoryIndex, MemoryRecordStore};
pub use record::{field_at, Document, RecordId};
pub use store::{RecordStore, SharedRecordStore};
