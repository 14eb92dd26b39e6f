//! Replays a prepared sequence of results

use std::collections::VecDeque;

use super::{failure, CommonStats, PlanStage, PlanStageStats, StageState, StageType};
use crate::executor::ExecutorError;
use crate::storage::{Document, RecordId};
use crate::working_set::{EntryState, WorkingSet, WorkingSetEntry};

enum Queued {
    Entry(WorkingSetEntry),
    NeedTime,
    Failure(ExecutorError),
    Dead,
}

/// Returns queued entries and states in order, then `IsEof`.
///
/// Entries are only copied into the working set when they are returned.
#[derive(Default)]
pub struct QueuedDataStage {
    queue: VecDeque<Queued>,
    common: CommonStats,
}

impl QueuedDataStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an already-built entry
    pub fn push_entry(&mut self, entry: WorkingSetEntry) {
        self.queue.push_back(Queued::Entry(entry));
    }

    /// Queues a detached document
    pub fn push_document(&mut self, document: Document) {
        let mut entry = WorkingSetEntry::default();
        entry.set_owned_document(document);
        self.push_entry(entry);
    }

    /// Queues a document read from `record_id`
    pub fn push_record(&mut self, record_id: RecordId, document: Document) {
        let mut entry = WorkingSetEntry::default();
        entry.set_record_and_document(record_id, document);
        self.push_entry(entry);
    }

    pub fn push_need_time(&mut self) {
        self.queue.push_back(Queued::NeedTime);
    }

    pub fn push_failure(&mut self, error: ExecutorError) {
        self.queue.push_back(Queued::Failure(error));
    }

    pub fn push_dead(&mut self) {
        self.queue.push_back(Queued::Dead);
    }
}

impl PlanStage for QueuedDataStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = match self.queue.pop_front() {
            None => StageState::IsEof,
            Some(Queued::NeedTime) => StageState::NeedTime,
            Some(Queued::Dead) => StageState::Dead,
            Some(Queued::Failure(error)) => failure(ws, &error),
            Some(Queued::Entry(entry)) => {
                let tracked = entry.state() == EntryState::RecordAndKey;
                let id = ws.allocate();
                *ws.get_mut(id) = entry;
                if tracked {
                    ws.track_record_and_key(id);
                }
                StageState::Advanced(id)
            }
        };
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.queue.is_empty()
    }

    fn stage_type(&self) -> StageType {
        StageType::QueuedData
    }

    fn stats(&self) -> PlanStageStats {
        PlanStageStats::new(StageType::QueuedData, self.common.clone())
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        Vec::new()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        Vec::new()
    }
}
