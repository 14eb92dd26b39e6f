//! Plan selection by competition
//!
//! Every candidate tree is worked round-robin for a bounded trial. Results
//! produced meanwhile are buffered per candidate, so nothing is lost when
//! the winner is fixed: the winner's buffer is drained first, then the
//! winner is worked live.

use std::sync::Arc;

use super::cache::SharedPlanCache;
use super::candidate::CandidatePlan;
use super::ranker::{PlanRanker, ProductivityRanker, RankingDecision};
use crate::config::PlanSelectionConfig;
use crate::executor::{ExecutorError, ExecutorResult, PlanYieldPolicy, YieldOutcome};
use crate::observability::{log_event_with_fields, Event, ExecutionMetrics, ObservationScope};
use crate::query::{CanonicalQuery, QuerySolution};
use crate::stage::{
    failure, CommonStats, InvalidationType, OperationContext, PlanStage, PlanStageStats,
    StageState, StageType,
};
use crate::storage::RecordId;
use crate::working_set::{member_status, WorkingSet};

/// A stage that chooses among candidate plans before producing results.
pub trait PlanSelector {
    /// Runs the trial and fixes the winner.
    ///
    /// Fails if every candidate failed or the executor was killed while
    /// the trial yielded.
    fn pick_best_plan(
        &mut self,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> ExecutorResult<()>;

    /// Winner's candidate index, once chosen
    fn best_plan_idx(&self) -> Option<usize>;

    /// Trial statistics of the candidates that were not chosen
    fn candidate_stats(&self) -> Vec<PlanStageStats>;
}

/// Runs candidate plans side by side and delegates to the best one.
pub struct MultiPlanStage {
    txn: Option<OperationContext>,
    query: CanonicalQuery,
    config: PlanSelectionConfig,
    ranker: Box<dyn PlanRanker>,
    cache: Option<SharedPlanCache>,
    metrics: Option<Arc<ExecutionMetrics>>,
    candidates: Vec<CandidatePlan>,
    best: Option<usize>,
    backup: Option<usize>,
    /// Set once every candidate failed or a kill ended the trial
    failure: Option<ExecutorError>,
    /// Most recent diagnostic from a failed candidate
    last_candidate_error: Option<ExecutorError>,
    /// Fetch requested by a candidate, honoured at the next yield
    pending_fetch: Option<RecordId>,
    ranking: Option<RankingDecision>,
    common: CommonStats,
}

impl MultiPlanStage {
    /// Creates a selector for `query` with default tunables and ranking
    /// and no plan cache
    pub fn new(txn: &OperationContext, query: CanonicalQuery) -> Self {
        Self {
            txn: Some(txn.clone()),
            query,
            config: PlanSelectionConfig::default(),
            ranker: Box::new(ProductivityRanker),
            cache: None,
            metrics: None,
            candidates: Vec::new(),
            best: None,
            backup: None,
            failure: None,
            last_candidate_error: None,
            pending_fetch: None,
            ranking: None,
            common: CommonStats::default(),
        }
    }

    pub fn with_config(mut self, config: PlanSelectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_ranker(mut self, ranker: Box<dyn PlanRanker>) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn with_cache(mut self, cache: SharedPlanCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Adds a candidate. Candidates must all be added before selection.
    pub fn add_plan(&mut self, solution: QuerySolution, root: Box<dyn PlanStage>) {
        self.candidates.push(CandidatePlan::new(solution, root));
    }

    pub fn add_candidate(&mut self, candidate: CandidatePlan) {
        self.candidates.push(candidate);
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn backup_plan_idx(&self) -> Option<usize> {
        self.backup
    }

    pub fn best_solution(&self) -> Option<&QuerySolution> {
        self.best.map(|ix| &self.candidates[ix].solution)
    }

    /// Ranking that fixed the winner
    pub fn ranking(&self) -> Option<&RankingDecision> {
        self.ranking.as_ref()
    }

    /// Frees every candidate's buffered results
    pub(crate) fn discard_all(&mut self, ws: &mut WorkingSet) {
        for candidate in &mut self.candidates {
            candidate.discard_results(ws);
        }
    }

    fn active_indexes(&self) -> Vec<usize> {
        match self.best {
            Some(best) => std::iter::once(best).chain(self.backup).collect(),
            None => (0..self.candidates.len()).collect(),
        }
    }

    /// Yields if the schedule says so or a candidate asked for a fetch.
    /// Returns false if the executor was killed meanwhile.
    fn try_yield(&mut self, ws: &mut WorkingSet, policy: &mut PlanYieldPolicy) -> bool {
        let fetch = self.pending_fetch.take();
        if policy.should_yield() || fetch.is_some() {
            if policy.yield_stage(self, ws, fetch) == YieldOutcome::Killed {
                self.failure = Some(ExecutorError::killed(
                    "executor killed during plan selection",
                ));
                return false;
            }
        }
        true
    }

    /// One round: works each live candidate once. Returns false once the
    /// trial is over.
    fn work_all_plans(
        &mut self,
        num_results: usize,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> bool {
        let mut done_working = false;

        for ix in 0..self.candidates.len() {
            if self.candidates[ix].failed {
                continue;
            }
            if !self.try_yield(ws, policy) {
                return false;
            }

            let candidate = &mut self.candidates[ix];
            match candidate.root.work(ws) {
                StageState::Advanced(id) => {
                    candidate.results.push_back(id);
                    if candidate.results.len() >= num_results {
                        done_working = true;
                    }
                }
                // First plan to finish ends the trial; ranking favours it
                StageState::IsEof => done_working = true,
                StageState::NeedFetch(id) => {
                    self.pending_fetch = ws.get_mut(id).take_fetch_request();
                    if !self.try_yield(ws, policy) {
                        return false;
                    }
                }
                StageState::NeedTime => {}
                state @ (StageState::Failure(_) | StageState::Dead) => {
                    candidate.failed = true;
                    if let StageState::Failure(id) = state {
                        let error = member_status(ws, id);
                        if !ws.is_free(id) {
                            ws.free(id);
                        }
                        self.last_candidate_error = Some(error);
                    }

                    if self.candidates.iter().all(|c| c.failed) {
                        let error = self.last_candidate_error.clone().unwrap_or_else(|| {
                            ExecutorError::plan_selection_failed("every candidate plan died")
                        });
                        self.failure = Some(error);
                        return false;
                    }
                }
            }
        }

        !done_working
    }

    fn select_winner(&mut self, decision: RankingDecision, ws: &mut WorkingSet) {
        let best = decision.candidate_order[0];
        self.best = Some(best);
        let shape = self.query.shape();
        let query_hash = shape.hash_hex();
        let winner_summary = self.candidates[best].solution.summary.clone();
        let produced = self.candidates[best].results.len();

        self.backup = None;
        if self.candidates[best].is_blocking() && produced == 0 {
            self.backup = decision
                .candidate_order
                .iter()
                .copied()
                .find(|&ix| !self.candidates[ix].is_blocking());
            if let Some(backup) = self.backup {
                let backup_idx = backup.to_string();
                log_event_with_fields(
                    Event::BackupPlanSelected,
                    &[
                        ("backup_idx", backup_idx.as_str()),
                        ("backup_summary", self.candidates[backup].solution.summary.as_str()),
                        ("query_hash", query_hash.as_str()),
                    ],
                );
            }
        }

        if decision.tie_for_best && decision.scores.len() > 1 {
            let runner_up = decision.candidate_order[1];
            let winner_score = decision.scores[0].to_string();
            let runner_up_score = decision.scores[1].to_string();
            log_event_with_fields(
                Event::PlanTie,
                &[
                    ("query_hash", query_hash.as_str()),
                    ("runner_up_score", runner_up_score.as_str()),
                    ("runner_up_summary", self.candidates[runner_up].solution.summary.as_str()),
                    ("winner_score", winner_score.as_str()),
                    ("winner_summary", winner_summary.as_str()),
                ],
            );
            for pos in decision.tied_runners_up().into_iter().skip(1) {
                let plan = decision.candidate_order[pos];
                let score = decision.scores[pos].to_string();
                let position = pos.to_string();
                log_event_with_fields(
                    Event::PlanTie,
                    &[
                        ("position", position.as_str()),
                        ("query_hash", query_hash.as_str()),
                        ("score", score.as_str()),
                        ("summary", self.candidates[plan].solution.summary.as_str()),
                    ],
                );
            }
        }

        if produced == 0 {
            let winner_score = decision.scores[0].to_string();
            log_event_with_fields(
                Event::WinnerZeroResults,
                &[
                    ("query_hash", query_hash.as_str()),
                    ("winner_score", winner_score.as_str()),
                    ("winner_summary", winner_summary.as_str()),
                ],
            );
        }

        self.maybe_cache(&decision, produced);

        // Losers are never worked again; their buffered results go now
        for ix in 0..self.candidates.len() {
            if Some(ix) != self.best && Some(ix) != self.backup {
                self.candidates[ix].discard_results(ws);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.increment_plans_selected();
        }
        self.ranking = Some(decision);
    }

    fn maybe_cache(&self, decision: &RankingDecision, produced: usize) {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return,
        };
        if !self.query.cacheable
            || !self.config.cache_enabled
            || decision.tie_for_best
            || produced == 0
        {
            return;
        }

        let solutions: Vec<QuerySolution> = decision
            .candidate_order
            .iter()
            .map(|&ix| self.candidates[ix].solution.clone())
            .collect();
        if solutions.iter().any(|s| s.cache_data.is_none()) {
            return;
        }

        let shape = self.query.shape();
        let query_hash = shape.hash_hex();
        cache.insert(shape, solutions, decision.clone());
        if let Some(metrics) = &self.metrics {
            metrics.increment_plans_cached();
        }
        log_event_with_fields(Event::PlanCached, &[("query_hash", query_hash.as_str())]);
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if let Some(error) = &self.failure {
            return failure(ws, error);
        }
        let best = match self.best {
            Some(best) => best,
            None => {
                return failure(
                    ws,
                    &ExecutorError::invariant_violation("MULTI_PLAN worked before plan selection"),
                )
            }
        };

        if let Some(id) = self.candidates[best].results.pop_front() {
            return StageState::Advanced(id);
        }

        let state = self.candidates[best].root.work(ws);

        if let (StageState::Failure(id), Some(backup)) = (state, self.backup) {
            let error = member_status(ws, id);
            if !ws.is_free(id) {
                ws.free(id);
            }
            let shape = self.query.shape();
            let query_hash = shape.hash_hex();
            if let Some(cache) = &self.cache {
                if cache.remove(&shape) {
                    if let Some(metrics) = &self.metrics {
                        metrics.increment_plans_uncached();
                    }
                    log_event_with_fields(
                        Event::PlanUncached,
                        &[("query_hash", query_hash.as_str())],
                    );
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.increment_backup_failovers();
            }
            log_event_with_fields(
                Event::BackupPlanFailover,
                &[("query_hash", query_hash.as_str()), ("reason", error.message())],
            );

            self.best = Some(backup);
            self.backup = None;
            if let Some(id) = self.candidates[backup].results.pop_front() {
                return StageState::Advanced(id);
            }
            return self.candidates[backup].root.work(ws);
        }

        if let (StageState::Advanced(_), Some(backup)) = (state, self.backup) {
            // The blocking winner is producing; the standby is no longer needed
            self.candidates[backup].discard_results(ws);
            self.backup = None;
            let backup_idx = backup.to_string();
            log_event_with_fields(
                Event::BackupPlanDiscarded,
                &[("backup_idx", backup_idx.as_str())],
            );
        }

        state
    }
}

impl PlanSelector for MultiPlanStage {
    fn pick_best_plan(
        &mut self,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> ExecutorResult<()> {
        let num_records = match &self.txn {
            Some(txn) => txn.store().num_records(),
            None => {
                return Err(ExecutorError::invariant_violation(
                    "plan selection started between save_state and restore_state",
                ))
            }
        };
        let num_works = self.config.trial_works(num_records);
        let num_results = self.config.trial_results(self.query.limit) as usize;

        let query_hash = self.query.shape().hash_hex();
        let candidates = self.candidates.len().to_string();
        let scope = ObservationScope::with_fields(
            "PLAN_SELECTION",
            &[("candidates", candidates.as_str()), ("query_hash", query_hash.as_str())],
        );

        if self.candidates.is_empty() {
            let error = ExecutorError::plan_selection_failed("no candidate plans");
            scope.fail(error.message());
            self.failure = Some(error.clone());
            return Err(error);
        }

        for _ in 0..num_works {
            if !self.work_all_plans(num_results, ws, policy) {
                break;
            }
        }

        if let Some(error) = self.failure.clone() {
            scope.fail(error.message());
            self.discard_all(ws);
            return Err(error);
        }

        let decision = match self.ranker.rank(&self.candidates) {
            Some(decision) if !decision.candidate_order.is_empty() => decision,
            _ => {
                let error = ExecutorError::plan_selection_failed("no candidate plan could be ranked");
                scope.fail(error.message());
                self.failure = Some(error.clone());
                self.discard_all(ws);
                return Err(error);
            }
        };

        let winner = decision.candidate_order[0].to_string();
        let score = decision.scores[0].to_string();
        self.select_winner(decision, ws);
        scope.complete_with_fields(&[("best_plan_idx", winner.as_str()), ("score", score.as_str())]);
        Ok(())
    }

    fn best_plan_idx(&self) -> Option<usize> {
        self.best
    }

    fn candidate_stats(&self) -> Vec<PlanStageStats> {
        self.candidates
            .iter()
            .enumerate()
            .filter(|(ix, _)| Some(*ix) != self.best && Some(*ix) != self.backup)
            .map(|(_, candidate)| candidate.stats())
            .collect()
    }
}

impl PlanStage for MultiPlanStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        if self.failure.is_some() {
            return true;
        }
        match self.best {
            Some(best) => {
                let plan = &self.candidates[best];
                plan.results.is_empty() && plan.root.is_eof()
            }
            None => false,
        }
    }

    fn stage_type(&self) -> StageType {
        StageType::MultiPlan
    }

    fn stats(&self) -> PlanStageStats {
        let mut stats = PlanStageStats::new(StageType::MultiPlan, self.common.clone())
            .with_detail("candidates", self.candidates.len() as u64)
            .with_children(self.children().iter().map(|c| c.stats()).collect());
        if let Some(best) = self.best {
            stats = stats.with_detail("best_plan_idx", best as u64);
        }
        if let Some(backup) = self.backup {
            stats = stats.with_detail("backup_plan_idx", backup as u64);
        }
        stats
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        self.active_indexes()
            .into_iter()
            .map(|ix| self.candidates[ix].root.as_ref() as &dyn PlanStage)
            .collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        let active = self.active_indexes();
        self.candidates
            .iter_mut()
            .enumerate()
            .filter(|(ix, _)| active.contains(ix))
            .map(|(_, candidate)| candidate.root.as_mut() as &mut dyn PlanStage)
            .collect()
    }

    fn do_save_state(&mut self) {
        self.txn = None;
        self.common.yields += 1;
    }

    fn do_restore_state(&mut self, txn: &OperationContext) {
        self.txn = Some(txn.clone());
        self.common.unyields += 1;
    }

    /// Only the candidates still in play are told; buffered results for
    /// `record_id` are dropped from the buffer and freed.
    fn invalidate(
        &mut self,
        txn: &OperationContext,
        ws: &mut WorkingSet,
        record_id: RecordId,
        kind: InvalidationType,
    ) {
        if self.failure.is_some() {
            return;
        }
        self.common.invalidates += 1;

        for ix in self.active_indexes() {
            let candidate = &mut self.candidates[ix];
            candidate.root.invalidate(txn, ws, record_id, kind);
            candidate.results.retain(|&id| {
                if ws.get(id).record_id() != Some(record_id) {
                    return true;
                }
                ws.free(id);
                false
            });
        }
    }

    fn as_plan_selector(&mut self) -> Option<&mut dyn PlanSelector> {
        Some(self)
    }
}
