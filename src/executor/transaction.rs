//! Transaction manager collaborator and kill signalling

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::stage::OperationContext;
use crate::storage::{RecordId, SharedRecordStore};

/// Lock/transaction scope the executor yields through.
///
/// A yield is `release`, an optional `fetch_unlocked`, then `reacquire`.
/// Contexts handed out before `release` must not be used after it.
pub trait TransactionManager {
    /// Gives up the current transactional scope
    fn release(&self);

    /// Pages `record_id` in while no scope is held
    fn fetch_unlocked(&self, record_id: RecordId);

    /// Opens a fresh scope
    fn reacquire(&self) -> OperationContext;
}

/// Shared transaction manager handle
pub type SharedTransactionManager = Arc<dyn TransactionManager + Send + Sync>;

/// Transaction manager over a single record store.
///
/// Each reacquire starts a new epoch. Counters are exposed for tests and
/// diagnostics.
pub struct LocalTransactionManager {
    store: SharedRecordStore,
    epoch: AtomicU64,
    releases: AtomicU64,
    unlocked_fetches: AtomicU64,
}

impl LocalTransactionManager {
    pub fn new(store: SharedRecordStore) -> Self {
        Self {
            store,
            epoch: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            unlocked_fetches: AtomicU64::new(0),
        }
    }

    /// Context for the current epoch, used to start an execution
    pub fn begin(&self) -> OperationContext {
        OperationContext::new(self.store.clone(), self.epoch.load(Ordering::Relaxed))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Number of scopes released so far
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Number of records paged in outside a scope
    pub fn unlocked_fetches(&self) -> u64 {
        self.unlocked_fetches.load(Ordering::Relaxed)
    }
}

impl TransactionManager for LocalTransactionManager {
    fn release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    fn fetch_unlocked(&self, record_id: RecordId) {
        self.unlocked_fetches.fetch_add(1, Ordering::Relaxed);
        self.store.page_in(record_id);
    }

    fn reacquire(&self) -> OperationContext {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        OperationContext::new(self.store.clone(), epoch)
    }
}

/// Cloneable kill switch for one executor.
///
/// The surrounding system may trip it from any thread. The executor checks
/// it before every `work()` call and after every yield.
#[derive(Debug, Clone, Default)]
pub struct KillHandle(Arc<AtomicBool>);

impl KillHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
