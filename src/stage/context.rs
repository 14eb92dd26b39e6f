//! Operation context handed to stages on restore and invalidation

use std::fmt;

use crate::storage::{Document, RecordId, SharedRecordStore};

/// Storage access valid for one transactional scope.
///
/// A context is obtained from the transaction manager and becomes stale
/// when the driver yields. Stages drop theirs in `save_state` and receive a
/// fresh one in `restore_state`.
#[derive(Clone)]
pub struct OperationContext {
    store: SharedRecordStore,
    epoch: u64,
}

impl OperationContext {
    /// Creates a context over `store` for the given yield epoch
    pub fn new(store: SharedRecordStore, epoch: u64) -> Self {
        Self { store, epoch }
    }

    /// Record store visible under this context
    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    /// Number of yields that preceded this context
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Shorthand for `store().fetch_document(id)`
    pub fn fetch(&self, id: RecordId) -> Option<Document> {
        self.store.fetch_document(id)
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
