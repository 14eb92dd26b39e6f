//! Generic expanding-ring proximity search stage

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use super::interval::{CoveredInterval, IntervalStats, NearStats};
use crate::executor::{ExecutorError, ExecutorResult};
use crate::observability::{log_event_with_fields, Event, ExecutionMetrics};
use crate::stage::{
    failure, missing_context, CommonStats, InvalidationType, OperationContext, PlanStage,
    PlanStageStats, StageState, StageType,
};
use crate::storage::RecordId;
use crate::working_set::{fetch_and_invalidate, WorkingSet, WorkingSetEntry, WorkingSetId};

/// The geometry-specific half of a proximity search.
///
/// [`NearStage`] drives the state machine, buffering and ordering;
/// implementors decide how big each interval is, how its candidates are
/// enumerated and how far a candidate is from the search centre.
pub trait NearSearch {
    /// Called until it answers `IsEof`. `NeedTime` and `Failure` are
    /// passed through to the caller.
    fn initialize(&mut self, _txn: &OperationContext, _ws: &mut WorkingSet) -> StageState {
        StageState::IsEof
    }

    /// The next ring to scan, or `None` once the whole search region has
    /// been covered
    fn next_interval(
        &mut self,
        txn: &OperationContext,
        ws: &mut WorkingSet,
        stats: &NearStats,
    ) -> ExecutorResult<Option<CoveredInterval>>;

    /// Distance of `entry` from the centre, annotating the entry with it.
    ///
    /// `None` drops the entry as outside the search region.
    fn compute_distance(&self, entry: &mut WorkingSetEntry) -> ExecutorResult<Option<f64>>;

    fn stage_type(&self) -> StageType;

    /// Index name and key pattern for explain output
    fn describe(&self, _stats: &mut NearStats) {}

    fn save_search_state(&mut self) {}

    fn restore_search_state(&mut self, _txn: &OperationContext) {}

    fn invalidate_search_state(
        &mut self,
        _txn: &OperationContext,
        _ws: &mut WorkingSet,
        _record_id: RecordId,
        _kind: InvalidationType,
    ) {
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    Initializing,
    Buffering,
    Advancing,
    Finished,
}

/// Buffered result, ordered so the heap pops the smallest distance first
#[derive(Debug, Clone, Copy)]
struct SearchResult {
    id: WorkingSetId,
    distance: f64,
}

impl PartialEq for SearchResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchResult {}

impl PartialOrd for SearchResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchResult {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Returns documents in non-decreasing distance order by scanning a
/// sequence of adjacent rings around the centre.
///
/// Each ring is scanned to completion and its in-range results sorted
/// before any of them is returned. Record ids seen in the current ring
/// are remembered until the ring is exhausted; while one is still buffered
/// its handle is kept so an invalidation can copy the document out before
/// the record goes away.
pub struct NearStage<S: NearSearch> {
    txn: Option<OperationContext>,
    search: S,
    state: SearchState,
    intervals: Vec<CoveredInterval>,
    current: Option<IntervalStats>,
    results: BinaryHeap<SearchResult>,
    seen: HashMap<RecordId, Option<WorkingSetId>>,
    near_stats: NearStats,
    common: CommonStats,
    metrics: Option<Arc<ExecutionMetrics>>,
}

impl<S: NearSearch> NearStage<S> {
    pub fn new(txn: &OperationContext, search: S) -> Self {
        let mut near_stats = NearStats::default();
        search.describe(&mut near_stats);
        Self {
            txn: Some(txn.clone()),
            search,
            state: SearchState::Initializing,
            intervals: Vec::new(),
            current: None,
            results: BinaryHeap::new(),
            seen: HashMap::new(),
            near_stats,
            common: CommonStats::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn search(&self) -> &S {
        &self.search
    }

    pub fn near_stats(&self) -> &NearStats {
        &self.near_stats
    }

    fn fail(&mut self, ws: &mut WorkingSet, error: &ExecutorError) -> StageState {
        self.state = SearchState::Finished;
        failure(ws, error)
    }

    fn init_next(&mut self, txn: &OperationContext, ws: &mut WorkingSet) -> StageState {
        match self.search.initialize(txn, ws) {
            StageState::IsEof => {
                self.state = SearchState::Buffering;
                StageState::NeedTime
            }
            state @ (StageState::Advanced(_) | StageState::NeedFetch(_)) => self.fail(
                ws,
                &ExecutorError::invariant_violation(format!(
                    "proximity search initialization returned {}",
                    state.as_str()
                )),
            ),
            other => other,
        }
    }

    fn open_interval(&mut self, txn: &OperationContext, ws: &mut WorkingSet) -> Option<StageState> {
        match self.search.next_interval(txn, ws, &self.near_stats) {
            Err(err) => Some(self.fail(ws, &err)),
            Ok(None) => {
                self.state = SearchState::Finished;
                Some(StageState::IsEof)
            }
            Ok(Some(interval)) => {
                let min = interval.min_distance.to_string();
                let max = interval.max_distance.to_string();
                log_event_with_fields(
                    Event::NearIntervalOpened,
                    &[
                        ("min_distance", min.as_str()),
                        ("max_distance", max.as_str()),
                        ("last", if interval.inclusive_max { "true" } else { "false" }),
                    ],
                );
                if let Some(metrics) = &self.metrics {
                    metrics.increment_near_intervals();
                }
                self.current = Some(IntervalStats::for_interval(&interval));
                self.intervals.push(interval);
                None
            }
        }
    }

    fn buffer_next(&mut self, txn: &OperationContext, ws: &mut WorkingSet) -> StageState {
        if self.current.is_none() {
            if let Some(state) = self.open_interval(txn, ws) {
                return state;
            }
        }
        let interval = match self.intervals.last_mut() {
            Some(interval) => interval,
            None => {
                return self.fail(
                    ws,
                    &ExecutorError::invariant_violation("no open proximity search interval"),
                )
            }
        };

        let id = match interval.covering.work(ws) {
            StageState::Advanced(id) => id,
            StageState::IsEof => {
                self.state = SearchState::Advancing;
                return StageState::NeedTime;
            }
            other => return other,
        };
        let dedup = interval.dedup_covering;
        let record_id = ws.get(id).record_id();

        if let Some(record_id) = record_id {
            if dedup && self.seen.contains_key(&record_id) {
                ws.free(id);
                return StageState::NeedTime;
            }
        }

        let distance = match self.search.compute_distance(ws.get_mut(id)) {
            Ok(distance) => distance,
            Err(err) => {
                ws.free(id);
                return self.fail(ws, &err);
            }
        };

        let stats = match self.current.as_mut() {
            Some(stats) => stats,
            None => {
                ws.free(id);
                return StageState::NeedTime;
            }
        };
        stats.num_results_found += 1;

        let distance = match distance {
            Some(distance) => distance,
            None => {
                ws.free(id);
                return StageState::NeedTime;
            }
        };
        stats.record_found(distance);

        let in_interval = self
            .intervals
            .last()
            .map_or(false, |interval| interval.contains(distance));
        if in_interval {
            stats.record_buffered(distance);
            self.results.push(SearchResult { id, distance });
            if let Some(record_id) = record_id {
                self.seen.insert(record_id, Some(id));
            }
        } else {
            ws.free(id);
        }
        StageState::NeedTime
    }

    fn advance_next(&mut self, ws: &mut WorkingSet) -> StageState {
        let result = match self.results.pop() {
            Some(result) => result,
            None => {
                if let Some(stats) = self.current.take() {
                    self.near_stats.intervals.push(stats);
                }
                self.seen.clear();
                self.state = SearchState::Buffering;
                return StageState::NeedTime;
            }
        };
        // The id stays known so a later copy from this ring is still dropped
        if let Some(record_id) = ws.get(result.id).record_id() {
            if let Some(slot) = self.seen.get_mut(&record_id) {
                *slot = None;
            }
        }
        StageState::Advanced(result.id)
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if self.state == SearchState::Finished {
            return StageState::IsEof;
        }
        let txn = match self.txn.clone() {
            Some(txn) => txn,
            None => return missing_context(ws, self.search.stage_type()),
        };
        match self.state {
            SearchState::Initializing => self.init_next(&txn, ws),
            SearchState::Buffering => self.buffer_next(&txn, ws),
            SearchState::Advancing => self.advance_next(ws),
            SearchState::Finished => StageState::IsEof,
        }
    }
}

impl<S: NearSearch> PlanStage for NearStage<S> {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.state == SearchState::Finished
    }

    fn stage_type(&self) -> StageType {
        self.search.stage_type()
    }

    fn stats(&self) -> PlanStageStats {
        let near = serde_json::to_value(&self.near_stats).unwrap_or_default();
        PlanStageStats::new(self.search.stage_type(), self.common.clone())
            .with_detail("near", near)
            .with_detail("buffered", self.results.len() as u64)
            .with_children(self.intervals.iter().map(|i| i.covering.stats()).collect())
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        self.intervals
            .iter()
            .map(|i| i.covering.as_ref() as &dyn PlanStage)
            .collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        self.intervals
            .iter_mut()
            .map(|i| i.covering.as_mut() as &mut dyn PlanStage)
            .collect()
    }

    fn do_save_state(&mut self) {
        self.txn = None;
        self.common.yields += 1;
        self.search.save_search_state();
    }

    fn do_restore_state(&mut self, txn: &OperationContext) {
        self.txn = Some(txn.clone());
        self.common.unyields += 1;
        self.search.restore_search_state(txn);
    }

    fn do_invalidate(
        &mut self,
        txn: &OperationContext,
        ws: &mut WorkingSet,
        record_id: RecordId,
        kind: InvalidationType,
    ) {
        self.common.invalidates += 1;
        // Buffered results stay in the heap; only their storage link is cut
        if let Some(id) = self.seen.get_mut(&record_id).and_then(Option::take) {
            fetch_and_invalidate(txn, ws.get_mut(id));
        }
        self.search.invalidate_search_state(txn, ws, record_id, kind);
    }
}
