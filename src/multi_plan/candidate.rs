//! One competing plan

use std::collections::VecDeque;

use crate::query::QuerySolution;
use crate::stage::{PlanStage, PlanStageStats};
use crate::working_set::{WorkingSet, WorkingSetId};

/// A candidate in plan selection: the planner's description, the stage
/// tree built from it, and the results it produced during the trial that
/// nobody has consumed yet.
pub struct CandidatePlan {
    pub solution: QuerySolution,
    pub root: Box<dyn PlanStage>,
    /// Results produced during the trial, oldest first
    pub results: VecDeque<WorkingSetId>,
    /// Set once the tree returned `Failure` or `Dead`; never worked again
    pub failed: bool,
}

impl CandidatePlan {
    pub fn new(solution: QuerySolution, root: Box<dyn PlanStage>) -> Self {
        Self {
            solution,
            root,
            results: VecDeque::new(),
            failed: false,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.solution.has_blocking_stage
    }

    pub fn stats(&self) -> PlanStageStats {
        self.root.stats()
    }

    /// Frees every buffered result
    pub(crate) fn discard_results(&mut self, ws: &mut WorkingSet) {
        for id in self.results.drain(..) {
            if !ws.is_free(id) {
                ws.free(id);
            }
        }
    }
}
