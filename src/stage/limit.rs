//! Stops after a fixed number of results

use super::{CommonStats, PlanStage, PlanStageStats, StageState, StageType};
use crate::working_set::WorkingSet;

pub struct LimitStage {
    child: Box<dyn PlanStage>,
    limit: u64,
    returned: u64,
    common: CommonStats,
}

impl LimitStage {
    pub fn new(child: Box<dyn PlanStage>, limit: u64) -> Self {
        Self {
            child,
            limit,
            returned: 0,
            common: CommonStats::default(),
        }
    }
}

impl PlanStage for LimitStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = if self.returned >= self.limit {
            StageState::IsEof
        } else {
            let state = self.child.work(ws);
            if let StageState::Advanced(_) = state {
                self.returned += 1;
            }
            state
        };
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.returned >= self.limit || self.child.is_eof()
    }

    fn stage_type(&self) -> StageType {
        StageType::Limit
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::Limit, self.common.clone())
            .with_detail("limit", self.limit)
            .with_children(vec![self.child.stats()])
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        vec![self.child.as_ref() as &dyn PlanStage]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        vec![self.child.as_mut() as &mut dyn PlanStage]
    }
}
