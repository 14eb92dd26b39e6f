//! Ordered scan over one or more key ranges of an index

use std::collections::HashSet;
use std::sync::Arc;

use super::{
    missing_context, CommonStats, InvalidationType, OperationContext, PlanStage, PlanStageStats,
    StageState, StageType,
};
use crate::storage::{IndexEntry, IndexKey, KeyRange, RecordId, SharedIndex};
use crate::working_set::{IndexKeyData, WorkingSet};

/// Predicate over raw index keys, applied before an entry is allocated
pub type KeyFilter = Arc<dyn Fn(&IndexKey) -> bool + Send + Sync>;

/// What an [`IndexScan`] reads
#[derive(Clone)]
pub struct IndexScanParams {
    pub index: SharedIndex,
    /// Ranges scanned in order
    pub ranges: Vec<KeyRange>,
    pub key_filter: Option<KeyFilter>,
    /// Drop keys whose record was already returned (multikey indexes,
    /// overlapping ranges)
    pub dedup: bool,
}

impl IndexScanParams {
    pub fn new(index: SharedIndex, ranges: Vec<KeyRange>) -> Self {
        Self {
            index,
            ranges,
            key_filter: None,
            dedup: false,
        }
    }

    pub fn with_key_filter(mut self, filter: KeyFilter) -> Self {
        self.key_filter = Some(filter);
        self
    }

    pub fn with_dedup(mut self) -> Self {
        self.dedup = true;
        self
    }
}

/// Produces `RecordAndKey` entries for every key inside the ranges.
///
/// The position is the last entry returned; each `work()` seeks strictly
/// past it, which keeps the scan valid across yields and index mutation.
pub struct IndexScan {
    txn: Option<OperationContext>,
    params: IndexScanParams,
    range_idx: usize,
    last_entry: Option<IndexEntry>,
    returned: HashSet<RecordId>,
    eof: bool,
    common: CommonStats,
    keys_examined: u64,
    dups_dropped: u64,
}

impl IndexScan {
    pub fn new(txn: &OperationContext, params: IndexScanParams) -> Self {
        let eof = params.ranges.is_empty();
        Self {
            txn: Some(txn.clone()),
            params,
            range_idx: 0,
            last_entry: None,
            returned: HashSet::new(),
            eof,
            common: CommonStats::default(),
            keys_examined: 0,
            dups_dropped: 0,
        }
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if self.txn.is_none() {
            return missing_context(ws, StageType::IndexScan);
        }

        let range = &self.params.ranges[self.range_idx];
        let entry = match self.params.index.seek(range, self.last_entry.as_ref()) {
            Some(entry) => entry,
            None => {
                self.range_idx += 1;
                self.last_entry = None;
                if self.range_idx >= self.params.ranges.len() {
                    self.eof = true;
                    return StageState::IsEof;
                }
                return StageState::NeedTime;
            }
        };
        self.last_entry = Some(entry.clone());
        self.keys_examined += 1;

        if let Some(filter) = &self.params.key_filter {
            if !filter(&entry.key) {
                return StageState::NeedTime;
            }
        }
        if self.params.dedup && !self.returned.insert(entry.record_id) {
            self.dups_dropped += 1;
            return StageState::NeedTime;
        }

        let id = ws.allocate();
        ws.get_mut(id).set_record_and_key(
            entry.record_id,
            vec![IndexKeyData {
                key_pattern: self.params.index.key_pattern().to_string(),
                key: entry.key,
            }],
        );
        ws.track_record_and_key(id);
        StageState::Advanced(id)
    }
}

impl PlanStage for IndexScan {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = if self.eof {
            StageState::IsEof
        } else {
            self.produce(ws)
        };
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn stage_type(&self) -> StageType {
        StageType::IndexScan
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::IndexScan, self.common.clone())
            .with_detail("index_name", self.params.index.name())
            .with_detail("keys_examined", self.keys_examined)
            .with_detail("dups_dropped", self.dups_dropped)
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        Vec::new()
    }

    fn do_save_state(&mut self) {
        self.txn = None;
        self.common.yields += 1;
    }

    fn do_restore_state(&mut self, txn: &OperationContext) {
        self.txn = Some(txn.clone());
        self.common.unyields += 1;
    }

    fn do_invalidate(
        &mut self,
        _txn: &OperationContext,
        _ws: &mut WorkingSet,
        record_id: RecordId,
        kind: InvalidationType,
    ) {
        self.common.invalidates += 1;
        // A deleted record id may be reused by a new record
        if kind == InvalidationType::Deletion {
            self.returned.remove(&record_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::storage::{MemoryIndex, MemoryRecordStore};
    use crate::working_set::EntryState;

    fn setup(docs: Vec<serde_json::Value>) -> (OperationContext, SharedIndex) {
        let store = Arc::new(MemoryRecordStore::with_documents(docs));
        let index = MemoryIndex::on_field("tags_1", "tags");
        index.build_from(store.as_ref());
        (OperationContext::new(store, 0), Arc::new(index))
    }

    fn collect_records(scan: &mut IndexScan, ws: &mut WorkingSet) -> Vec<RecordId> {
        let mut out = Vec::new();
        loop {
            match scan.work(ws) {
                StageState::Advanced(id) => {
                    assert_eq!(ws.get(id).state(), EntryState::RecordAndKey);
                    out.push(ws.get(id).record_id().unwrap());
                    ws.free(id);
                }
                StageState::NeedTime => {}
                StageState::IsEof => return out,
                other => panic!("unexpected state {:?}", other),
            }
        }
    }

    #[test]
    fn test_multiple_ranges_in_order() {
        let (txn, index) = setup(vec![json!({"tags": 3}), json!({"tags": 1}), json!({"tags": 2})]);
        let params = IndexScanParams::new(
            index,
            vec![
                KeyRange::point(IndexKey::Number(2.0)),
                KeyRange::point(IndexKey::Number(1.0)),
            ],
        );
        let mut scan = IndexScan::new(&txn, params);
        let mut ws = WorkingSet::new();
        assert_eq!(collect_records(&mut scan, &mut ws), vec![RecordId(3), RecordId(2)]);
    }

    #[test]
    fn test_dedup_multikey() {
        let (txn, index) = setup(vec![json!({"tags": ["a", "b", "c"]}), json!({"tags": ["b"]})]);
        let params = IndexScanParams::new(index, vec![KeyRange::all()]).with_dedup();
        let mut scan = IndexScan::new(&txn, params);
        let mut ws = WorkingSet::new();
        assert_eq!(collect_records(&mut scan, &mut ws), vec![RecordId(1), RecordId(2)]);
        assert_eq!(scan.stats().details["dups_dropped"], json!(2));
    }

    #[test]
    fn test_key_filter() {
        let (txn, index) = setup((0..6).map(|i| json!({ "tags": i })).collect());
        let even: KeyFilter = Arc::new(|key: &IndexKey| matches!(key, IndexKey::Number(n) if *n as i64 % 2 == 0));
        let params = IndexScanParams::new(index, vec![KeyRange::all()]).with_key_filter(even);
        let mut scan = IndexScan::new(&txn, params);
        let mut ws = WorkingSet::new();
        assert_eq!(
            collect_records(&mut scan, &mut ws),
            vec![RecordId(1), RecordId(3), RecordId(5)]
        );
    }

    #[test]
    fn test_empty_ranges_are_eof() {
        let (txn, index) = setup(Vec::new());
        let scan = IndexScan::new(&txn, IndexScanParams::new(index, Vec::new()));
        assert!(scan.is_eof());
    }
}
