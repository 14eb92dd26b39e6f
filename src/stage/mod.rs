//! Stage protocol
//!
//! A query runs as a tree of stages. The driver calls `work()` on the root;
//! every call does a bounded amount of work and reports what happened as a
//! [`StageState`]. No stage ever blocks inside `work()`: a stage that needs
//! a record paged in answers `NeedFetch` and lets the driver yield.
//!
//! # Yields
//!
//! Between two `work()` calls the driver may release the storage context.
//! It brackets that window with `save_state()` / `restore_state()`. Stages
//! drop their [`OperationContext`] on save and must not trust storage
//! positions they observed earlier until they re-validate them.
//!
//! # Invalidation
//!
//! `invalidate()` is delivered, with a live context, for every record that
//! is about to be deleted or moved. A stage holding that record in a buffer
//! either drops it or copies its document into the entry before the record
//! id becomes meaningless.

mod collection_scan;
mod context;
mod fetch;
mod index_scan;
mod limit;
mod merge_sort;
mod or;
mod queued_data;
mod sort;
mod stats;

pub use collection_scan::CollectionScan;
pub use context::OperationContext;
pub use fetch::FetchStage;
pub use index_scan::{IndexScan, IndexScanParams, KeyFilter};
pub use limit::LimitStage;
pub use merge_sort::MergeSortStage;
pub use or::OrStage;
pub use queued_data::QueuedDataStage;
pub use sort::SortStage;
pub use stats::{CommonStats, PlanStageStats};

use std::fmt;

use serde::Serialize;

use crate::executor::ExecutorError;
use crate::multi_plan::PlanSelector;
use crate::storage::RecordId;
use crate::working_set::{allocate_status_member, WorkingSet, WorkingSetId};

/// Outcome of one call to [`PlanStage::work`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// A result was produced; the caller now owns the handle
    Advanced(WorkingSetId),
    /// No result yet; call again
    NeedTime,
    /// The entry's fetch request must be honoured before the stage can
    /// continue. The stage keeps ownership of the handle.
    NeedFetch(WorkingSetId),
    /// No more results
    IsEof,
    /// Unrecoverable; the handle is a status member describing the error
    Failure(WorkingSetId),
    /// The surrounding execution was killed
    Dead,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Advanced(_) => "ADVANCED",
            StageState::NeedTime => "NEED_TIME",
            StageState::NeedFetch(_) => "NEED_FETCH",
            StageState::IsEof => "IS_EOF",
            StageState::Failure(_) => "FAILURE",
            StageState::Dead => "DEAD",
        }
    }
}

/// Why a record is being invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationType {
    /// The record is about to be deleted
    Deletion,
    /// The record is about to change or move
    Mutation,
}

/// Kind of stage, for explain output and tree searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageType {
    CollectionScan,
    IndexScan,
    Fetch,
    Limit,
    Sort,
    MergeSort,
    Or,
    QueuedData,
    MultiPlan,
    Subplan,
    #[serde(rename = "GEO_NEAR_2D")]
    GeoNear2d,
    #[serde(rename = "GEO_NEAR_2DSPHERE")]
    GeoNear2dSphere,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::CollectionScan => "COLLECTION_SCAN",
            StageType::IndexScan => "INDEX_SCAN",
            StageType::Fetch => "FETCH",
            StageType::Limit => "LIMIT",
            StageType::Sort => "SORT",
            StageType::MergeSort => "MERGE_SORT",
            StageType::Or => "OR",
            StageType::QueuedData => "QUEUED_DATA",
            StageType::MultiPlan => "MULTI_PLAN",
            StageType::Subplan => "SUBPLAN",
            StageType::GeoNear2d => "GEO_NEAR_2D",
            StageType::GeoNear2dSphere => "GEO_NEAR_2DSPHERE",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resumable, non-blocking unit of query execution.
///
/// `save_state`, `restore_state` and `invalidate` visit the children first
/// and then call the stage's own `do_*` hook. Stages override the hooks,
/// not the visiting methods.
pub trait PlanStage {
    /// Performs one bounded unit of work
    fn work(&mut self, ws: &mut WorkingSet) -> StageState;

    /// Returns true once the stage will only ever answer `IsEof`
    fn is_eof(&self) -> bool;

    fn stage_type(&self) -> StageType;

    /// Statistics for this stage and its subtree
    fn stats(&self) -> PlanStageStats;

    fn children(&self) -> Vec<&dyn PlanStage>;

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage>;

    /// Prepares the subtree for the storage context going away
    fn save_state(&mut self) {
        for child in self.children_mut() {
            child.save_state();
        }
        self.do_save_state();
    }

    /// Hands the subtree a fresh context after a yield
    fn restore_state(&mut self, txn: &OperationContext) {
        for child in self.children_mut() {
            child.restore_state(txn);
        }
        self.do_restore_state(txn);
    }

    /// Notifies the subtree that `record_id` is about to become invalid
    fn invalidate(
        &mut self,
        txn: &OperationContext,
        ws: &mut WorkingSet,
        record_id: RecordId,
        kind: InvalidationType,
    ) {
        for child in self.children_mut() {
            child.invalidate(txn, ws, record_id, kind);
        }
        self.do_invalidate(txn, ws, record_id, kind);
    }

    fn do_save_state(&mut self) {}

    fn do_restore_state(&mut self, _txn: &OperationContext) {}

    fn do_invalidate(
        &mut self,
        _txn: &OperationContext,
        _ws: &mut WorkingSet,
        _record_id: RecordId,
        _kind: InvalidationType,
    ) {
    }

    /// Stages that choose between candidate plans expose themselves here
    fn as_plan_selector(&mut self) -> Option<&mut dyn PlanSelector> {
        None
    }
}

/// Allocates a status member for `error` and returns the failure state
pub fn failure(ws: &mut WorkingSet, error: &ExecutorError) -> StageState {
    StageState::Failure(allocate_status_member(ws, error))
}

/// Failure returned when `work()` runs without a storage context
pub(crate) fn missing_context(ws: &mut WorkingSet, stage_type: StageType) -> StageState {
    failure(
        ws,
        &ExecutorError::invariant_violation(format!(
            "{} worked between save_state and restore_state",
            stage_type
        )),
    )
}

/// Finds the first plan-selecting stage in the tree rooted at `stage`
pub fn find_plan_selector(stage: &mut dyn PlanStage) -> Option<&mut dyn PlanSelector> {
    if stage.as_plan_selector().is_some() {
        return stage.as_plan_selector();
    }
    for child in stage.children_mut() {
        if let Some(selector) = find_plan_selector(child) {
            return Some(selector);
        }
    }
    None
}
