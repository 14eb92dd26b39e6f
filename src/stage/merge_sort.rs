//! K-way merge of children that each produce results in sort order

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use super::{
    CommonStats, InvalidationType, OperationContext, PlanStage, PlanStageStats, StageState,
    StageType,
};
use crate::query::{SortSpec, ValueComparator};
use crate::storage::RecordId;
use crate::working_set::{fetch_and_invalidate, WorkingSet, WorkingSetId};

/// Merges already-sorted children into one sorted stream.
///
/// At most one pending result per child is held. Ties between children go
/// to the lower child index.
pub struct MergeSortStage {
    children: Vec<Box<dyn PlanStage>>,
    pattern: Vec<SortSpec>,
    dedup: bool,
    seen: HashSet<RecordId>,
    /// Children that must produce a value before the next merge step
    needs_value: VecDeque<usize>,
    /// One pending result per child that has one
    pending: Vec<(WorkingSetId, usize)>,
    common: CommonStats,
    dups_dropped: u64,
    forced_fetches: u64,
}

impl MergeSortStage {
    pub fn new(children: Vec<Box<dyn PlanStage>>, pattern: Vec<SortSpec>, dedup: bool) -> Self {
        let needs_value = (0..children.len()).collect();
        Self {
            children,
            pattern,
            dedup,
            seen: HashSet::new(),
            needs_value,
            pending: Vec::new(),
            common: CommonStats::default(),
            dups_dropped: 0,
            forced_fetches: 0,
        }
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if let Some(&child_idx) = self.needs_value.front() {
            return match self.children[child_idx].work(ws) {
                StageState::Advanced(id) => {
                    if self.dedup {
                        if let Some(record_id) = ws.get(id).record_id() {
                            if !self.seen.insert(record_id) {
                                self.dups_dropped += 1;
                                ws.free(id);
                                return StageState::NeedTime;
                            }
                        }
                    }
                    self.needs_value.pop_front();
                    self.pending.push((id, child_idx));
                    StageState::NeedTime
                }
                StageState::IsEof => {
                    self.needs_value.pop_front();
                    StageState::NeedTime
                }
                other => other,
            };
        }

        if self.pending.is_empty() {
            return StageState::IsEof;
        }

        let pattern = &self.pattern;
        let best = self
            .pending
            .iter()
            .enumerate()
            .min_by(|(_, (a, ai)), (_, (b, bi))| {
                match ValueComparator::compare_entries(ws.get(*a), ws.get(*b), pattern) {
                    Ordering::Equal => ai.cmp(bi),
                    other => other,
                }
            })
            .map(|(pos, _)| pos);
        let (id, child_idx) = match best {
            Some(pos) => self.pending.swap_remove(pos),
            None => return StageState::IsEof,
        };
        self.needs_value.push_back(child_idx);

        // Invalidated while pending; nothing else refers to it
        if ws.is_flagged(id) {
            ws.free(id);
            return StageState::NeedTime;
        }
        StageState::Advanced(id)
    }
}

impl PlanStage for MergeSortStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.needs_value.is_empty() && self.pending.is_empty()
    }

    fn stage_type(&self) -> StageType {
        StageType::MergeSort
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::MergeSort, self.common.clone())
            .with_detail("dups_dropped", self.dups_dropped)
            .with_detail("forced_fetches", self.forced_fetches)
            .with_children(self.children.iter().map(|c| c.stats()).collect())
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        self.children
            .iter()
            .map(|c| c.as_ref() as &dyn PlanStage)
            .collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        self.children
            .iter_mut()
            .map(|c| c.as_mut() as &mut dyn PlanStage)
            .collect()
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
        kind: InvalidationType,
    ) {
        self.common.invalidates += 1;
        for (id, _) in &self.pending {
            if ws.get(*id).record_id() == Some(record_id) {
                fetch_and_invalidate(txn, ws.get_mut(*id));
                ws.flag_for_review(*id);
                self.forced_fetches += 1;
            }
        }
        if kind == InvalidationType::Deletion {
            self.seen.remove(&record_id);
        }
    }
}
