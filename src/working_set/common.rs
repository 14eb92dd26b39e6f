//! Helpers shared by stages that manipulate working set entries

use serde_json::{json, Value};

use super::entry::{EntryState, WorkingSetEntry};
use super::set::{WorkingSet, WorkingSetId};
use crate::executor::{ExecutorError, ExecutorErrorCode};
use crate::stage::OperationContext;

/// Detaches `entry` from its storage position.
///
/// The document is read under `txn` if the entry does not already hold
/// one. Returns false if the record is gone and nothing could be kept; the
/// caller should then drop the entry.
pub fn fetch_and_invalidate(txn: &OperationContext, entry: &mut WorkingSetEntry) -> bool {
    match entry.state() {
        EntryState::OwnedDocument => true,
        EntryState::RecordAndDocument => match entry.document().cloned() {
            Some(doc) => {
                entry.set_owned_document(doc);
                true
            }
            None => false,
        },
        EntryState::RecordAndKey => {
            let fetched = entry.record_id().and_then(|id| txn.fetch(id));
            match fetched {
                Some(doc) => {
                    entry.set_owned_document(doc);
                    true
                }
                None => false,
            }
        }
        EntryState::IndexKeyOnly | EntryState::Invalid => false,
    }
}

/// Reads the document of every tracked `RecordAndKey` entry so that it
/// survives a yield. Entries whose record vanished are left for the stage
/// holding them, which drops them on its next fetch.
pub fn force_fetch_all(txn: &OperationContext, ws: &mut WorkingSet) {
    for id in ws.take_record_and_key_ids() {
        if ws.is_free(id) {
            continue;
        }
        let entry = ws.get_mut(id);
        if entry.state() != EntryState::RecordAndKey {
            continue;
        }
        let record_id = match entry.record_id() {
            Some(record_id) => record_id,
            None => continue,
        };
        match txn.fetch(record_id) {
            Some(doc) => entry.set_record_and_document(record_id, doc),
            None => continue,
        }
    }
}

/// Allocates an entry describing `error`. Stages return its handle with
/// `StageState::Failure`.
pub fn allocate_status_member(ws: &mut WorkingSet, error: &ExecutorError) -> WorkingSetId {
    let id = ws.allocate();
    ws.get_mut(id).set_owned_document(json!({
        "ok": 0,
        "code": error.code().code(),
        "errmsg": error.message(),
    }));
    id
}

/// Returns true if `doc` has the shape written by [`allocate_status_member`]
pub fn is_status_document(doc: &Value) -> bool {
    doc.get("ok").and_then(Value::as_i64) == Some(0)
        && doc.get("code").map_or(false, Value::is_string)
        && doc.get("errmsg").map_or(false, Value::is_string)
}

/// Recovers the error stored in status member `id`.
///
/// Falls back to a generic execution failure if `id` was freed or does not
/// hold a status document.
pub fn member_status(ws: &WorkingSet, id: WorkingSetId) -> ExecutorError {
    let generic = || ExecutorError::execution_failed("no details available");
    if ws.is_free(id) {
        return generic();
    }
    let doc = match ws.get(id).document() {
        Some(doc) if is_status_document(doc) => doc,
        _ => return generic(),
    };

    let code = doc
        .get("code")
        .and_then(Value::as_str)
        .and_then(ExecutorErrorCode::from_code)
        .unwrap_or(ExecutorErrorCode::AeroExecutionFailed);
    let message = doc.get("errmsg").and_then(Value::as_str).unwrap_or_default();
    ExecutorError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::storage::{MemoryRecordStore, RecordId};

    fn context(store: &Arc<MemoryRecordStore>) -> OperationContext {
        OperationContext::new(store.clone(), 0)
    }

    #[test]
    fn test_status_member_round_trip() {
        let mut ws = WorkingSet::new();
        let err = ExecutorError::bad_geometry("radius must be non-negative");
        let id = allocate_status_member(&mut ws, &err);
        assert!(is_status_document(ws.get(id).document().unwrap()));
        assert_eq!(member_status(&ws, id), err);
    }

    #[test]
    fn test_member_status_without_details() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate();
        let err = member_status(&ws, id);
        assert_eq!(err.code(), ExecutorErrorCode::AeroExecutionFailed);
        assert_eq!(err.message(), "no details available");
    }

    #[test]
    fn test_fetch_and_invalidate_reads_document() {
        let store = Arc::new(MemoryRecordStore::new());
        let rid = store.insert(json!({"a": 1}));
        let mut entry = WorkingSetEntry::default();
        entry.set_record_and_key(rid, Vec::new());

        assert!(fetch_and_invalidate(&context(&store), &mut entry));
        assert_eq!(entry.state(), EntryState::OwnedDocument);
        assert_eq!(entry.document(), Some(&json!({"a": 1})));
        assert_eq!(entry.record_id(), None);
    }

    #[test]
    fn test_fetch_and_invalidate_missing_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut entry = WorkingSetEntry::default();
        entry.set_record_and_key(RecordId(99), Vec::new());
        assert!(!fetch_and_invalidate(&context(&store), &mut entry));
    }

    #[test]
    fn test_force_fetch_all() {
        let store = Arc::new(MemoryRecordStore::new());
        let kept = store.insert(json!({"k": 1}));
        let gone = store.insert(json!({"k": 2}));

        let mut ws = WorkingSet::new();
        let a = ws.allocate();
        ws.get_mut(a).set_record_and_key(kept, Vec::new());
        ws.track_record_and_key(a);
        let b = ws.allocate();
        ws.get_mut(b).set_record_and_key(gone, Vec::new());
        ws.track_record_and_key(b);
        store.remove(gone);

        force_fetch_all(&context(&store), &mut ws);
        assert_eq!(ws.get(a).state(), EntryState::RecordAndDocument);
        assert_eq!(ws.get(b).state(), EntryState::RecordAndKey);
    }
}
