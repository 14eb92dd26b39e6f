//! Executor construction, yielding, killing and failure reporting

use std::io::Write;
use std::sync::Arc;
use std::thread;

use serde_json::json;

use aerodb_exec::config::{ExecutionConfig, YieldConfig};
use aerodb_exec::executor::{
    ExecutorError, ExecutorErrorCode, GetNext, KillHandle, LocalTransactionManager, PlanExecutor,
    PlanYieldPolicy, TransactionManager, YieldMode,
};
use aerodb_exec::multi_plan::MultiPlanStage;
use aerodb_exec::query::{CanonicalQuery, Predicate, QuerySolution};
use aerodb_exec::stage::{CollectionScan, LimitStage, OperationContext, QueuedDataStage};
use aerodb_exec::storage::{MemoryRecordStore, RecordId, RecordStore, SharedRecordStore};
use aerodb_exec::working_set::WorkingSet;

fn numbered(n: u64) -> Arc<MemoryRecordStore> {
    Arc::new(MemoryRecordStore::with_documents((0..n).map(|i| json!({ "n": i }))))
}

fn manual_policy(txn: &OperationContext) -> PlanYieldPolicy {
    PlanYieldPolicy::new(YieldMode::Manual, &YieldConfig::default(), txn.clone(), KillHandle::new())
}

/// Trips the kill switch the first time the scope is released
struct KillOnRelease {
    store: SharedRecordStore,
    kill: KillHandle,
}

impl TransactionManager for KillOnRelease {
    fn release(&self) {
        self.kill.kill();
    }

    fn fetch_unlocked(&self, record_id: RecordId) {
        self.store.page_in(record_id);
    }

    fn reacquire(&self) -> OperationContext {
        OperationContext::new(self.store.clone(), 1)
    }
}

#[test]
fn config_file_drives_yield_schedule() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"yielding": {{"iterations": 2, "period_ms": 60000}}}}"#).unwrap();
    let config = ExecutionConfig::load(file.path()).unwrap();

    let store = numbered(10);
    let manager = Arc::new(LocalTransactionManager::new(store));
    let txn = manager.begin();
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let policy = PlanYieldPolicy::from_config(YieldMode::Auto, &config, txn, KillHandle::new())
        .with_manager(manager.clone());
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), policy).unwrap();

    let result = executor.execute_plan().unwrap();
    assert_eq!(result.len(), 10);
    // One yield per two units of work
    assert_eq!(result.yields, result.works / 2);
    assert_eq!(manager.releases(), result.yields);
    assert_eq!(executor.context().epoch(), manager.epoch());
}

#[test]
fn non_resident_records_are_paged_in_outside_the_scope() {
    let store = numbered(4);
    store.mark_non_resident(RecordId(2));
    store.mark_non_resident(RecordId(4));
    let manager = Arc::new(LocalTransactionManager::new(store.clone()));
    let txn = manager.begin();
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let policy = PlanYieldPolicy::new(YieldMode::Auto, &YieldConfig::default(), txn, KillHandle::new())
        .with_manager(manager.clone());
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), policy).unwrap();

    let result = executor.execute_plan().unwrap();
    assert_eq!(
        result.record_ids(),
        vec![RecordId(1), RecordId(2), RecordId(3), RecordId(4)]
    );
    assert_eq!(manager.unlocked_fetches(), 2);
    assert_eq!(store.page_in_count(), 2);
    assert_eq!(executor.metrics().snapshot().fetch_yields, 2);
}

#[test]
fn manual_mode_pages_in_without_yielding() {
    let store = numbered(2);
    store.mark_non_resident(RecordId(1));
    let txn = OperationContext::new(store.clone(), 0);
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), manual_policy(&txn)).unwrap();

    let result = executor.execute_plan().unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.yields, 0);
    assert_eq!(store.page_in_count(), 1);
}

#[test]
fn caller_driven_yield_tolerates_deletes() {
    let store = numbered(5);
    let txn = OperationContext::new(store.clone(), 0);
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), manual_policy(&txn)).unwrap();

    assert!(matches!(executor.get_next(), GetNext::Advanced(_)));
    assert!(matches!(executor.get_next(), GetNext::Advanced(_)));

    executor.save_state();
    store.remove(RecordId(2));
    store.remove(RecordId(3));
    executor
        .restore_state(&OperationContext::new(store.clone(), 1))
        .unwrap();

    let rest = executor.execute_plan().unwrap();
    assert_eq!(rest.record_ids(), vec![RecordId(4), RecordId(5)]);
}

#[test]
fn kill_from_another_thread() {
    let store = numbered(100);
    let txn = OperationContext::new(store, 0);
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), manual_policy(&txn)).unwrap();
    assert!(matches!(executor.get_next(), GetNext::Advanced(_)));

    let handle = executor.kill_handle();
    thread::spawn(move || handle.kill()).join().unwrap();

    assert_eq!(executor.get_next(), GetNext::Dead);
    assert_eq!(executor.get_next(), GetNext::Dead);
    let err = executor.execute_plan().unwrap_err();
    assert!(err.is_killed());
}

#[test]
fn kill_during_yield_is_dead_not_failure() {
    let store = numbered(10);
    let txn = OperationContext::new(store.clone(), 0);
    let kill = KillHandle::new();
    let manager = Arc::new(KillOnRelease {
        store: store.clone(),
        kill: kill.clone(),
    });
    let every_work = YieldConfig {
        iterations: 1,
        period_ms: 60_000,
    };
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let policy = PlanYieldPolicy::new(YieldMode::Auto, &every_work, txn, kill).with_manager(manager);
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), policy).unwrap();

    let mut advanced = 0;
    loop {
        match executor.get_next() {
            GetNext::Advanced(_) => advanced += 1,
            GetNext::Dead => break,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(advanced < 10);
    assert!(executor.is_eof());
}

#[test]
fn kill_during_plan_selection_fails_make() {
    let store = numbered(10);
    let txn = OperationContext::new(store.clone(), 0);
    let kill = KillHandle::new();
    let manager = Arc::new(KillOnRelease {
        store: store.clone(),
        kill: kill.clone(),
    });
    let every_work = YieldConfig {
        iterations: 1,
        period_ms: 60_000,
    };
    let mut mps = MultiPlanStage::new(&txn, CanonicalQuery::new());
    mps.add_plan(QuerySolution::new("A"), Box::new(CollectionScan::new(&txn, Vec::new())));
    mps.add_plan(QuerySolution::new("B"), Box::new(CollectionScan::new(&txn, Vec::new())));
    let policy = PlanYieldPolicy::new(YieldMode::Auto, &every_work, txn, kill).with_manager(manager);

    let err = match PlanExecutor::make(Box::new(mps), WorkingSet::new(), policy) {
        Ok(_) => panic!("plan selection should observe the kill"),
        Err(err) => err,
    };
    assert_eq!(err.code(), ExecutorErrorCode::AeroExecutorKilled);
}

#[test]
fn failure_carries_stage_diagnostic() {
    let store = numbered(1);
    let txn = OperationContext::new(store, 0);
    let mut queued = QueuedDataStage::new();
    queued.push_document(json!({"n": 0}));
    queued.push_failure(ExecutorError::bad_geometry("point out of range"));
    let mut executor = PlanExecutor::make(Box::new(queued), WorkingSet::new(), manual_policy(&txn)).unwrap();

    let err = executor.execute_plan().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::AeroBadGeometry);
    assert_eq!(err.message(), "point out of range");
    assert!(err.to_string().contains("AERO_BAD_GEOMETRY"));
}

#[test]
fn limit_stops_before_eof_of_child() {
    let store = numbered(50);
    let txn = OperationContext::new(store, 0);
    let scan = CollectionScan::new(&txn, vec![Predicate::gte("n", json!(10))]);
    let root = Box::new(LimitStage::new(Box::new(scan), 3));
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), manual_policy(&txn)).unwrap();

    let result = executor.execute_plan().unwrap();
    let ns: Vec<_> = result.iter().map(|d| d.document["n"].clone()).collect();
    assert_eq!(ns, vec![json!(10), json!(11), json!(12)]);
    assert!(executor.is_eof());
}

#[test]
fn explain_json_names_query() {
    let store = numbered(3);
    let txn = OperationContext::new(store, 0);
    let root = Box::new(CollectionScan::new(&txn, Vec::new()));
    let mut executor = PlanExecutor::make(root, WorkingSet::new(), manual_policy(&txn)).unwrap();
    executor.execute_plan().unwrap();

    let explain: serde_json::Value = serde_json::from_str(&executor.explain().to_json()).unwrap();
    assert_eq!(explain["query_id"], json!(executor.query_id().to_string()));
    assert_eq!(explain["winning_plan"]["stage_type"], json!("COLLECTION_SCAN"));
    assert_eq!(explain["winning_plan"]["common"]["advanced"], json!(3));
    assert_eq!(explain["metrics"]["advanced"], json!(3));
}
