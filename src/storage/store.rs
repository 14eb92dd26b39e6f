//! Record store collaborator trait

use std::sync::Arc;

use super::record::{Document, RecordId};

/// Record-level access to one collection.
///
/// Implemented by the storage engine. All methods take `&self`; stores are
/// shared between the executor and whatever mutates the collection.
pub trait RecordStore {
    /// Returns a copy of the document at `id`, or `None` if no such record.
    fn fetch_document(&self, id: RecordId) -> Option<Document>;

    /// Returns true if a record exists at `id`.
    fn exists(&self, id: RecordId) -> bool;

    /// Returns the smallest record id strictly greater than `after`
    /// (or the first record if `after` is `None`).
    ///
    /// `after` need not exist any more; scans resume from a deleted
    /// position without error.
    fn next_after(&self, after: Option<RecordId>) -> Option<RecordId>;

    /// Number of records in the collection.
    fn num_records(&self) -> u64;

    /// Returns true if reading `id` would block on I/O.
    ///
    /// Stages answer `NeedFetch` for such records instead of blocking.
    fn needs_fetch(&self, _id: RecordId) -> bool {
        false
    }

    /// Brings `id` into memory. Called by the driver while no locks are held.
    fn page_in(&self, _id: RecordId) {}
}

/// Record store shared across the stage tree and the driver.
pub type SharedRecordStore = Arc<dyn RecordStore + Send + Sync>;
