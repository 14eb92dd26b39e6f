//! Full scan of the record store in record id order

use super::{
    missing_context, CommonStats, OperationContext, PlanStage, PlanStageStats, StageState,
    StageType,
};
use crate::query::{Predicate, PredicateFilter};
use crate::storage::RecordId;
use crate::working_set::{WorkingSet, WorkingSetId};

/// Scans every record, returning those matching an optional filter.
///
/// The scan position is the last record id handed out, so a scan resumes
/// correctly after a yield even if that record was deleted meanwhile.
pub struct CollectionScan {
    txn: Option<OperationContext>,
    filter: Vec<Predicate>,
    last_seen: Option<RecordId>,
    /// Entry parked while its record is paged in
    waiting: Option<WorkingSetId>,
    eof: bool,
    common: CommonStats,
    docs_tested: u64,
}

impl CollectionScan {
    pub fn new(txn: &OperationContext, filter: Vec<Predicate>) -> Self {
        Self {
            txn: Some(txn.clone()),
            filter,
            last_seen: None,
            waiting: None,
            eof: false,
            common: CommonStats::default(),
            docs_tested: 0,
        }
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        let txn = match &self.txn {
            Some(txn) => txn,
            None => return missing_context(ws, StageType::CollectionScan),
        };

        if let Some(id) = self.waiting.take() {
            let record_id = match ws.get(id).record_id() {
                Some(record_id) => record_id,
                None => {
                    ws.free(id);
                    return StageState::NeedTime;
                }
            };
            if txn.store().needs_fetch(record_id) {
                ws.get_mut(id).request_fetch(record_id);
                self.waiting = Some(id);
                return StageState::NeedFetch(id);
            }
            self.last_seen = Some(record_id);
            return self.emit(ws, id, record_id);
        }

        let record_id = match txn.store().next_after(self.last_seen) {
            Some(record_id) => record_id,
            None => {
                self.eof = true;
                return StageState::IsEof;
            }
        };

        let id = ws.allocate();
        if txn.store().needs_fetch(record_id) {
            let entry = ws.get_mut(id);
            entry.set_record_and_key(record_id, Vec::new());
            entry.request_fetch(record_id);
            self.waiting = Some(id);
            return StageState::NeedFetch(id);
        }
        self.last_seen = Some(record_id);
        self.emit(ws, id, record_id)
    }

    fn emit(&mut self, ws: &mut WorkingSet, id: WorkingSetId, record_id: RecordId) -> StageState {
        let doc = match self.txn.as_ref().and_then(|txn| txn.fetch(record_id)) {
            Some(doc) => doc,
            None => {
                // Deleted between positioning and reading
                ws.free(id);
                return StageState::NeedTime;
            }
        };
        self.docs_tested += 1;
        if !PredicateFilter::matches(&doc, &self.filter) {
            ws.free(id);
            return StageState::NeedTime;
        }
        ws.get_mut(id).set_record_and_document(record_id, doc);
        StageState::Advanced(id)
    }
}

impl PlanStage for CollectionScan {
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
        StageType::CollectionScan
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::CollectionScan, self.common.clone())
            .with_detail("docs_tested", self.docs_tested)
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
}
