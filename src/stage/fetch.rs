//! Reads full documents for entries located through an index

use super::{
    missing_context, CommonStats, InvalidationType, OperationContext, PlanStage, PlanStageStats,
    StageState, StageType,
};
use crate::query::{Predicate, PredicateFilter};
use crate::storage::RecordId;
use crate::working_set::{fetch_and_invalidate, WorkingSet, WorkingSetId};

/// Turns `RecordAndKey` entries from its child into `RecordAndDocument`
/// entries and applies a document filter.
///
/// Entries whose record disappeared are dropped silently. Non-resident
/// records are reported with `NeedFetch` and retried on the next call.
pub struct FetchStage {
    txn: Option<OperationContext>,
    child: Box<dyn PlanStage>,
    filter: Vec<Predicate>,
    retrying: Option<WorkingSetId>,
    common: CommonStats,
    already_has_document: u64,
    forced_fetches: u64,
    docs_examined: u64,
}

impl FetchStage {
    pub fn new(txn: &OperationContext, child: Box<dyn PlanStage>, filter: Vec<Predicate>) -> Self {
        Self {
            txn: Some(txn.clone()),
            child,
            filter,
            retrying: None,
            common: CommonStats::default(),
            already_has_document: 0,
            forced_fetches: 0,
            docs_examined: 0,
        }
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if self.txn.is_none() {
            return missing_context(ws, StageType::Fetch);
        }

        if let Some(id) = self.retrying.take() {
            return self.fetch_completed(ws, id);
        }

        match self.child.work(ws) {
            StageState::Advanced(id) => {
                let entry = ws.get(id);
                if entry.has_document() {
                    self.already_has_document += 1;
                    return self.return_if_matches(ws, id);
                }
                let record_id = match entry.record_id() {
                    Some(record_id) => record_id,
                    None => return self.return_if_matches(ws, id),
                };
                if self.needs_fetch(record_id) {
                    ws.get_mut(id).request_fetch(record_id);
                    self.retrying = Some(id);
                    return StageState::NeedFetch(id);
                }
                self.fetch_completed(ws, id)
            }
            other => other,
        }
    }

    fn needs_fetch(&self, record_id: RecordId) -> bool {
        self.txn
            .as_ref()
            .map_or(false, |txn| txn.store().needs_fetch(record_id))
    }

    fn fetch_completed(&mut self, ws: &mut WorkingSet, id: WorkingSetId) -> StageState {
        let entry = ws.get(id);
        if entry.has_document() {
            return self.return_if_matches(ws, id);
        }
        let record_id = match entry.record_id() {
            Some(record_id) => record_id,
            None => {
                ws.free(id);
                return StageState::NeedTime;
            }
        };
        if self.needs_fetch(record_id) {
            ws.get_mut(id).request_fetch(record_id);
            self.retrying = Some(id);
            return StageState::NeedFetch(id);
        }

        match self.txn.as_ref().and_then(|txn| txn.fetch(record_id)) {
            Some(doc) => {
                self.docs_examined += 1;
                ws.get_mut(id).set_record_and_document(record_id, doc);
                self.return_if_matches(ws, id)
            }
            None => {
                ws.free(id);
                StageState::NeedTime
            }
        }
    }

    fn return_if_matches(&mut self, ws: &mut WorkingSet, id: WorkingSetId) -> StageState {
        if PredicateFilter::matches_entry(ws.get(id), &self.filter) {
            StageState::Advanced(id)
        } else {
            ws.free(id);
            StageState::NeedTime
        }
    }
}

impl PlanStage for FetchStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.retrying.is_none() && self.child.is_eof()
    }

    fn stage_type(&self) -> StageType {
        StageType::Fetch
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::Fetch, self.common.clone())
            .with_detail("already_has_document", self.already_has_document)
            .with_detail("forced_fetches", self.forced_fetches)
            .with_detail("docs_examined", self.docs_examined)
            .with_children(vec![self.child.stats()])
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        vec![self.child.as_ref() as &dyn PlanStage]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        vec![self.child.as_mut() as &mut dyn PlanStage]
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
        txn: &OperationContext,
        ws: &mut WorkingSet,
        record_id: RecordId,
        _kind: InvalidationType,
    ) {
        self.common.invalidates += 1;
        if let Some(id) = self.retrying {
            if ws.get(id).record_id() == Some(record_id) {
                self.forced_fetches += 1;
                // An owned copy is returned by the retry; otherwise nothing is left
                if !fetch_and_invalidate(txn, ws.get_mut(id)) {
                    ws.free(id);
                    self.retrying = None;
                }
            }
        }
    }
}
