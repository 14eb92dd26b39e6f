//! Union of children, one after another

use std::collections::HashSet;

use super::{
    CommonStats, InvalidationType, OperationContext, PlanStage, PlanStageStats, StageState,
    StageType,
};
use crate::storage::RecordId;
use crate::working_set::WorkingSet;

/// Returns everything the first child produces, then everything the
/// second produces, and so on.
///
/// With `dedup` set, a record returned by an earlier child is dropped when
/// a later child produces it again. Records stay known after an
/// invalidation, so a mutated record is still returned only once.
pub struct OrStage {
    children: Vec<Box<dyn PlanStage>>,
    current: usize,
    dedup: bool,
    seen: HashSet<RecordId>,
    common: CommonStats,
    dups_dropped: u64,
}

impl OrStage {
    pub fn new(children: Vec<Box<dyn PlanStage>>, dedup: bool) -> Self {
        Self {
            children,
            current: 0,
            dedup,
            seen: HashSet::new(),
            common: CommonStats::default(),
            dups_dropped: 0,
        }
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        let child = match self.children.get_mut(self.current) {
            Some(child) => child,
            None => return StageState::IsEof,
        };
        match child.work(ws) {
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
                StageState::Advanced(id)
            }
            StageState::IsEof => {
                self.current += 1;
                if self.current < self.children.len() {
                    StageState::NeedTime
                } else {
                    StageState::IsEof
                }
            }
            other => other,
        }
    }
}

impl PlanStage for OrStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.current >= self.children.len()
    }

    fn stage_type(&self) -> StageType {
        StageType::Or
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::Or, self.common.clone())
            .with_detail("dups_dropped", self.dups_dropped)
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
        _txn: &OperationContext,
        _ws: &mut WorkingSet,
        _record_id: RecordId,
        _kind: InvalidationType,
    ) {
        self.common.invalidates += 1;
    }
}
