//! Blocking in-memory sort

use std::collections::{HashMap, VecDeque};

use super::{
    CommonStats, InvalidationType, OperationContext, PlanStage, PlanStageStats, StageState,
    StageType,
};
use crate::query::{SortSpec, ValueComparator};
use crate::storage::RecordId;
use crate::working_set::{fetch_and_invalidate, WorkingSet, WorkingSetId};

/// Consumes its whole input, then returns it in sort order.
///
/// Buffered entries whose record is invalidated are copied into owned
/// documents and still returned.
pub struct SortStage {
    child: Box<dyn PlanStage>,
    pattern: Vec<SortSpec>,
    limit: Option<u64>,
    buffer: Vec<WorkingSetId>,
    sorted: Option<VecDeque<WorkingSetId>>,
    by_record: HashMap<RecordId, WorkingSetId>,
    common: CommonStats,
    forced_fetches: u64,
}

impl SortStage {
    pub fn new(child: Box<dyn PlanStage>, pattern: Vec<SortSpec>, limit: Option<u64>) -> Self {
        Self {
            child,
            pattern,
            limit,
            buffer: Vec::new(),
            sorted: None,
            by_record: HashMap::new(),
            common: CommonStats::default(),
            forced_fetches: 0,
        }
    }

    fn finish_buffering(&mut self, ws: &mut WorkingSet) {
        let pattern = &self.pattern;
        self.buffer
            .sort_by(|a, b| ValueComparator::compare_entries(ws.get(*a), ws.get(*b), pattern));

        if let Some(limit) = self.limit {
            let keep = usize::try_from(limit).unwrap_or(usize::MAX);
            if self.buffer.len() > keep {
                for id in self.buffer.split_off(keep) {
                    if let Some(record_id) = ws.get(id).record_id() {
                        self.by_record.remove(&record_id);
                    }
                    ws.free(id);
                }
            }
        }
        self.sorted = Some(std::mem::take(&mut self.buffer).into());
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if let Some(sorted) = self.sorted.as_mut() {
            return match sorted.pop_front() {
                Some(id) => {
                    if let Some(record_id) = ws.get(id).record_id() {
                        self.by_record.remove(&record_id);
                    }
                    StageState::Advanced(id)
                }
                None => StageState::IsEof,
            };
        }

        match self.child.work(ws) {
            StageState::Advanced(id) => {
                if let Some(record_id) = ws.get(id).record_id() {
                    self.by_record.insert(record_id, id);
                }
                self.buffer.push(id);
                StageState::NeedTime
            }
            StageState::IsEof => {
                self.finish_buffering(ws);
                StageState::NeedTime
            }
            other => other,
        }
    }
}

impl PlanStage for SortStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.sorted.as_ref().map_or(false, VecDeque::is_empty)
    }

    fn stage_type(&self) -> StageType {
        StageType::Sort
    }

    fn stats(&self) -> PlanStageStats {
        let pattern: Vec<String> = self.pattern.iter().map(|s| s.to_string()).collect();
        PlanStageStats::new(StageType::Sort, self.common.clone())
            .with_detail("pattern", pattern)
            .with_detail("forced_fetches", self.forced_fetches)
            .with_children(vec![self.child.stats()])
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        vec![self.child.as_ref() as &dyn PlanStage]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        vec![self.child.as_mut() as &mut dyn PlanStage]
    }

    fn do_save_state(&mut self) {
        self.common.yields += 1;
    }

    fn do_restore_state(&mut self, _txn: &OperationContext) {
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
        let id = match self.by_record.remove(&record_id) {
            Some(id) => id,
            None => return,
        };
        self.forced_fetches += 1;
        if fetch_and_invalidate(txn, ws.get_mut(id)) {
            return;
        }
        // Nothing left to return for this entry
        self.buffer.retain(|b| *b != id);
        if let Some(sorted) = self.sorted.as_mut() {
            sorted.retain(|b| *b != id);
        }
        ws.free(id);
    }
}
