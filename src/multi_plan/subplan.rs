//! Per-clause planning of disjunctions
//!
//! A query whose filter is a disjunction of clauses is planned one clause
//! at a time: each clause gets its own candidates and, when there is more
//! than one, its own competition. The clause winners are then unioned.
//! Clause winners go through the plan cache under the clause's own shape;
//! the disjunction as a whole is never cached.
//!
//! If any clause cannot be planned the query is planned as a whole instead.

use std::sync::Arc;

use super::cache::SharedPlanCache;
use super::candidate::CandidatePlan;
use super::stage::{MultiPlanStage, PlanSelector};
use crate::config::PlanSelectionConfig;
use crate::executor::{ExecutorError, ExecutorResult, PlanYieldPolicy};
use crate::observability::{log_event_with_fields, Event, ExecutionMetrics};
use crate::query::{CanonicalQuery, QuerySolution};
use crate::stage::{
    failure, CommonStats, InvalidationType, OperationContext, OrStage, PlanStage,
    PlanStageStats, StageState, StageType,
};
use crate::storage::RecordId;
use crate::working_set::WorkingSet;

/// Produces candidate stage trees for a query.
pub trait QueryPlanner {
    /// Every candidate plan for `query`. An error or an empty list means
    /// the query cannot be planned.
    fn plan(&self, txn: &OperationContext, query: &CanonicalQuery)
        -> ExecutorResult<Vec<CandidatePlan>>;

    /// Rebuilds the tree a cached `solution` describes
    fn plan_from_cache(
        &self,
        txn: &OperationContext,
        query: &CanonicalQuery,
        solution: &QuerySolution,
    ) -> ExecutorResult<Box<dyn PlanStage>>;
}

pub type SharedQueryPlanner = Arc<dyn QueryPlanner + Send + Sync>;

/// A clause plan waiting for the other clauses
enum ParkedBranch {
    /// Built directly; never worked
    Tree(Box<dyn PlanStage>),
    /// Won a competition and may hold trial results
    Competed(MultiPlanStage),
}

impl ParkedBranch {
    fn stage(&self) -> &dyn PlanStage {
        match self {
            ParkedBranch::Tree(root) => root.as_ref(),
            ParkedBranch::Competed(mps) => mps,
        }
    }

    fn stage_mut(&mut self) -> &mut dyn PlanStage {
        match self {
            ParkedBranch::Tree(root) => root.as_mut(),
            ParkedBranch::Competed(mps) => mps,
        }
    }

    fn into_stage(self) -> Box<dyn PlanStage> {
        match self {
            ParkedBranch::Tree(root) => root,
            ParkedBranch::Competed(mps) => Box::new(mps),
        }
    }
}

/// Plans a disjunction clause by clause and runs the union of the clause
/// winners.
pub struct SubplanStage {
    query: CanonicalQuery,
    planner: SharedQueryPlanner,
    config: PlanSelectionConfig,
    cache: Option<SharedPlanCache>,
    metrics: Option<Arc<ExecutionMetrics>>,
    parked: Vec<ParkedBranch>,
    /// Per clause: built from the plan cache
    from_cache: Vec<bool>,
    child: Option<Box<dyn PlanStage>>,
    planned_whole: bool,
    best: Option<usize>,
    rejected: Vec<PlanStageStats>,
    failure: Option<ExecutorError>,
    common: CommonStats,
}

impl SubplanStage {
    pub fn new(query: CanonicalQuery, planner: SharedQueryPlanner) -> Self {
        Self {
            query,
            planner,
            config: PlanSelectionConfig::default(),
            cache: None,
            metrics: None,
            parked: Vec::new(),
            from_cache: Vec::new(),
            child: None,
            planned_whole: false,
            best: None,
            rejected: Vec::new(),
            failure: None,
            common: CommonStats::default(),
        }
    }

    pub fn with_config(mut self, config: PlanSelectionConfig) -> Self {
        self.config = config;
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

    /// Disjunctions without a sort are planned per clause; the union of
    /// clause results carries no order.
    pub fn can_use_subplanning(query: &CanonicalQuery) -> bool {
        query.is_rooted_or() && query.sort.is_empty()
    }

    /// True if clause `i` was built from its cached winner
    pub fn branch_planned_from_cache(&self, i: usize) -> bool {
        self.from_cache.get(i).copied().unwrap_or(false)
    }

    /// True if per-clause planning was abandoned for whole-query planning
    pub fn planned_whole_query(&self) -> bool {
        self.planned_whole
    }

    fn competition(&self, txn: &OperationContext, query: CanonicalQuery) -> MultiPlanStage {
        let mut mps = MultiPlanStage::new(txn, query).with_config(self.config.clone());
        if let Some(cache) = &self.cache {
            mps = mps.with_cache(cache.clone());
        }
        if let Some(metrics) = &self.metrics {
            mps = mps.with_metrics(metrics.clone());
        }
        mps
    }

    fn plan_branch(
        &mut self,
        ix: usize,
        branch: CanonicalQuery,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> ExecutorResult<ParkedBranch> {
        let txn = policy.context().clone();
        let shape = branch.shape();

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.lookup(&shape))
            .and_then(|entry| entry.winner().cloned());
        if let Some(solution) = cached {
            let root = self.planner.plan_from_cache(&txn, &branch, &solution)?;
            let clause = ix.to_string();
            let query_hash = shape.hash_hex();
            log_event_with_fields(
                Event::SubplanBranchCached,
                &[
                    ("clause", clause.as_str()),
                    ("query_hash", query_hash.as_str()),
                    ("summary", solution.summary.as_str()),
                ],
            );
            self.from_cache.push(true);
            return Ok(ParkedBranch::Tree(root));
        }

        let mut candidates = self.planner.plan(&txn, &branch)?;
        if candidates.is_empty() {
            return Err(ExecutorError::plan_selection_failed(format!(
                "no candidate plans for clause {}",
                ix
            )));
        }
        self.from_cache.push(false);
        if candidates.len() == 1 {
            if let Some(only) = candidates.pop() {
                return Ok(ParkedBranch::Tree(only.root));
            }
        }

        let mut mps = self.competition(&txn, branch);
        for candidate in candidates {
            mps.add_candidate(candidate);
        }
        mps.pick_best_plan(ws, policy)?;
        self.rejected.extend(mps.candidate_stats());
        Ok(ParkedBranch::Competed(mps))
    }

    fn plan_branches(
        &mut self,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> ExecutorResult<()> {
        for (ix, branch) in self.query.branch_queries().into_iter().enumerate() {
            let mut parked = self.plan_branch(ix, branch, ws, policy)?;
            // Later clauses may yield; a parked plan must not keep the
            // context it was planned under
            parked.stage_mut().save_state();
            self.parked.push(parked);
        }

        let txn = policy.context().clone();
        let roots: Vec<Box<dyn PlanStage>> = self
            .parked
            .drain(..)
            .map(|mut parked| {
                parked.stage_mut().restore_state(&txn);
                parked.into_stage()
            })
            .collect();
        self.child = Some(Box::new(OrStage::new(roots, true)));
        self.best = Some(0);
        Ok(())
    }

    fn plan_whole_query(
        &mut self,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> ExecutorResult<()> {
        let txn = policy.context().clone();
        let mut candidates = self.planner.plan(&txn, &self.query)?;
        if candidates.is_empty() {
            return Err(ExecutorError::plan_selection_failed("no candidate plans"));
        }
        if candidates.len() == 1 {
            if let Some(only) = candidates.pop() {
                self.child = Some(only.root);
                self.best = Some(0);
                return Ok(());
            }
        }

        // Whole disjunctions stay out of the plan cache
        let query = if Self::can_use_subplanning(&self.query) {
            self.query.clone().uncacheable()
        } else {
            self.query.clone()
        };
        let mut mps = self.competition(&txn, query);
        for candidate in candidates {
            mps.add_candidate(candidate);
        }
        mps.pick_best_plan(ws, policy)?;
        self.best = mps.best_plan_idx();
        self.rejected.extend(mps.candidate_stats());
        self.child = Some(Box::new(mps));
        Ok(())
    }

    /// Releases whatever per-clause planning left behind
    fn discard_branches(&mut self, ws: &mut WorkingSet) {
        for parked in self.parked.drain(..) {
            if let ParkedBranch::Competed(mut mps) = parked {
                mps.discard_all(ws);
            }
        }
        self.from_cache.clear();
        self.rejected.clear();
    }

    fn produce(&mut self, ws: &mut WorkingSet) -> StageState {
        if let Some(error) = &self.failure {
            return failure(ws, error);
        }
        match self.child.as_mut() {
            Some(child) => child.work(ws),
            None => failure(
                ws,
                &ExecutorError::invariant_violation("SUBPLAN worked before plan selection"),
            ),
        }
    }
}

impl PlanSelector for SubplanStage {
    fn pick_best_plan(
        &mut self,
        ws: &mut WorkingSet,
        policy: &mut PlanYieldPolicy,
    ) -> ExecutorResult<()> {
        let result = if Self::can_use_subplanning(&self.query) {
            match self.plan_branches(ws, policy) {
                Err(err) if !err.is_killed() => {
                    let query_hash = self.query.shape().hash_hex();
                    log_event_with_fields(
                        Event::SubplanFallback,
                        &[("query_hash", query_hash.as_str()), ("reason", err.message())],
                    );
                    self.discard_branches(ws);
                    self.planned_whole = true;
                    self.plan_whole_query(ws, policy)
                }
                other => other,
            }
        } else {
            self.planned_whole = true;
            self.plan_whole_query(ws, policy)
        };

        if let Err(err) = &result {
            self.discard_branches(ws);
            self.failure = Some(err.clone());
        }
        result
    }

    fn best_plan_idx(&self) -> Option<usize> {
        self.best
    }

    fn candidate_stats(&self) -> Vec<PlanStageStats> {
        self.rejected.clone()
    }
}

impl PlanStage for SubplanStage {
    fn work(&mut self, ws: &mut WorkingSet) -> StageState {
        let state = self.produce(ws);
        self.common.record(&state);
        state
    }

    fn is_eof(&self) -> bool {
        self.failure.is_some() || self.child.as_ref().map_or(false, |c| c.is_eof())
    }

    fn stage_type(&self) -> StageType {
        StageType::Subplan
    }

    fn stats(&self) -> PlanStageStats {
        let cached = self.from_cache.iter().filter(|c| **c).count() as u64;
        PlanStageStats::new(StageType::Subplan, self.common.clone())
            .with_detail("clauses", self.query.or_clauses.len() as u64)
            .with_detail("clauses_from_cache", cached)
            .with_detail("planned_whole_query", self.planned_whole)
            .with_children(self.children().iter().map(|c| c.stats()).collect())
    }

    fn children(&self) -> Vec<&dyn PlanStage> {
        match &self.child {
            Some(child) => vec![child.as_ref() as &dyn PlanStage],
            None => self.parked.iter().map(ParkedBranch::stage).collect(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut dyn PlanStage> {
        match &mut self.child {
            Some(child) => vec![child.as_mut() as &mut dyn PlanStage],
            None => self.parked.iter_mut().map(ParkedBranch::stage_mut).collect(),
        }
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

    fn as_plan_selector(&mut self) -> Option<&mut dyn PlanSelector> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use serde_json::json;

    use crate::config::YieldConfig;
    use crate::executor::{KillHandle, LocalTransactionManager, YieldMode};
    use crate::multi_plan::{InMemoryPlanCache, PlanCache};
    use crate::query::{FilterOp, Predicate};
    use crate::stage::{find_plan_selector, CollectionScan, FetchStage, IndexScan, IndexScanParams};
    use crate::storage::{IndexAccess, IndexKey, KeyRange, MemoryIndex, MemoryRecordStore};

    /// Collection scan plus one index plan per equality on an indexed field
    struct IndexPlanner {
        indexes: Vec<Arc<MemoryIndex>>,
        unplannable_field: Option<&'static str>,
    }

    impl IndexPlanner {
        fn candidates(&self, txn: &OperationContext, predicates: &[Predicate]) -> Vec<CandidatePlan> {
            let mut out = vec![CandidatePlan::new(
                QuerySolution::new("COLLECTION_SCAN"),
                Box::new(CollectionScan::new(txn, predicates.to_vec())),
            )];
            for pred in predicates {
                let value = match &pred.op {
                    FilterOp::Eq(value) => value,
                    _ => continue,
                };
                let index = self.indexes.iter().find(|ix| ix.key_pattern() == pred.field);
                let (index, key) = match (index, IndexKey::from_value(value)) {
                    (Some(index), Some(key)) => (index, key),
                    _ => continue,
                };
                let scan = IndexScan::new(
                    txn,
                    IndexScanParams::new(index.clone(), vec![KeyRange::point(key)]),
                );
                out.push(CandidatePlan::new(
                    QuerySolution::new(format!("FETCH <- IXSCAN {}", index.name())),
                    Box::new(FetchStage::new(txn, Box::new(scan), predicates.to_vec())),
                ));
            }
            out
        }
    }

    impl QueryPlanner for IndexPlanner {
        fn plan(
            &self,
            txn: &OperationContext,
            query: &CanonicalQuery,
        ) -> ExecutorResult<Vec<CandidatePlan>> {
            if !query.or_clauses.is_empty() {
                let scans = query
                    .or_clauses
                    .iter()
                    .map(|clause| Box::new(CollectionScan::new(txn, clause.clone())) as Box<dyn PlanStage>)
                    .collect();
                return Ok(vec![CandidatePlan::new(
                    QuerySolution::new("OR <- COLLECTION_SCAN"),
                    Box::new(OrStage::new(scans, true)),
                )]);
            }
            if let Some(field) = self.unplannable_field {
                if query.predicates.iter().any(|p| p.field == field) {
                    return Ok(Vec::new());
                }
            }
            Ok(self.candidates(txn, &query.predicates))
        }

        fn plan_from_cache(
            &self,
            txn: &OperationContext,
            query: &CanonicalQuery,
            solution: &QuerySolution,
        ) -> ExecutorResult<Box<dyn PlanStage>> {
            self.candidates(txn, &query.predicates)
                .into_iter()
                .find(|c| c.solution == *solution)
                .map(|c| c.root)
                .ok_or_else(|| ExecutorError::plan_selection_failed("cached plan no longer applies"))
        }
    }

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        txn: OperationContext,
        planner: SharedQueryPlanner,
    }

    fn fixture(unplannable_field: Option<&'static str>) -> Fixture {
        let store = Arc::new(MemoryRecordStore::with_documents(
            (0..200).map(|i| json!({ "i": i, "a": i % 50, "b": i % 40 })),
        ));
        let a = MemoryIndex::on_field("a_1", "a");
        a.build_from(store.as_ref());
        let b = MemoryIndex::on_field("b_1", "b");
        b.build_from(store.as_ref());
        let planner = Arc::new(IndexPlanner {
            indexes: vec![Arc::new(a), Arc::new(b)],
            unplannable_field,
        });
        Fixture {
            txn: OperationContext::new(store.clone(), 0),
            store,
            planner,
        }
    }

    /// a == 3 matches 3, 53, 103, 153; b == 13 matches 13, 53, 93, 133, 173
    fn disjunction() -> CanonicalQuery {
        CanonicalQuery::new()
            .with_or_clause(vec![Predicate::eq("a", json!(3))])
            .with_or_clause(vec![Predicate::eq("b", json!(13))])
    }

    fn manual_policy(txn: &OperationContext) -> PlanYieldPolicy {
        PlanYieldPolicy::new(YieldMode::Manual, &YieldConfig::default(), txn.clone(), KillHandle::new())
    }

    fn drain(stage: &mut SubplanStage, ws: &mut WorkingSet) -> Vec<i64> {
        let mut out = Vec::new();
        loop {
            match stage.work(ws) {
                StageState::Advanced(id) => {
                    out.push(ws.get(id).document().unwrap()["i"].as_i64().unwrap());
                    ws.free(id);
                }
                StageState::NeedTime => {}
                StageState::IsEof => return out,
                other => panic!("unexpected state {:?}", other),
            }
        }
    }

    fn sorted(mut v: Vec<i64>) -> Vec<i64> {
        v.sort_unstable();
        v
    }

    #[test]
    fn test_clauses_planned_separately() {
        let f = fixture(None);
        let mut stage = SubplanStage::new(disjunction(), f.planner.clone());
        let mut ws = WorkingSet::new();
        stage.pick_best_plan(&mut ws, &mut manual_policy(&f.txn)).unwrap();

        assert!(!stage.planned_whole_query());
        assert_eq!(stage.best_plan_idx(), Some(0));
        // Each clause rejected its collection scan
        let rejected = stage.candidate_stats();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|s| s.stage_type == StageType::CollectionScan));

        let out = drain(&mut stage, &mut ws);
        assert_eq!(sorted(out), vec![3, 13, 53, 93, 103, 133, 153, 173]);
        assert!(ws.is_empty());

        let stats = stage.stats();
        assert!(stats.contains(StageType::Or));
        assert!(stats.contains(StageType::IndexScan));
    }

    #[test]
    fn test_clause_winners_are_cached() {
        let f = fixture(None);
        let cache = Arc::new(InMemoryPlanCache::new());
        let mut first = SubplanStage::new(disjunction(), f.planner.clone()).with_cache(cache.clone());
        let mut ws = WorkingSet::new();
        first.pick_best_plan(&mut ws, &mut manual_policy(&f.txn)).unwrap();
        let expected = sorted(drain(&mut first, &mut ws));

        // One entry per clause, none for the disjunction
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&disjunction().shape()).is_none());
        let clause = &disjunction().branch_queries()[0];
        assert_eq!(
            cache.lookup(&clause.shape()).unwrap().winner().unwrap().summary,
            "FETCH <- IXSCAN a_1"
        );

        let mut second = SubplanStage::new(disjunction(), f.planner.clone()).with_cache(cache.clone());
        second.pick_best_plan(&mut ws, &mut manual_policy(&f.txn)).unwrap();
        assert!(second.branch_planned_from_cache(0));
        assert!(second.branch_planned_from_cache(1));
        assert!(second.candidate_stats().is_empty());
        assert_eq!(sorted(drain(&mut second, &mut ws)), expected);
    }

    #[test]
    fn test_unplannable_clause_falls_back_to_whole_query() {
        let f = fixture(Some("b"));
        let mut stage = SubplanStage::new(disjunction(), f.planner.clone());
        let mut ws = WorkingSet::new();
        stage.pick_best_plan(&mut ws, &mut manual_policy(&f.txn)).unwrap();

        assert!(stage.planned_whole_query());
        // The first clause's trial results were released
        assert!(ws.is_empty());
        let out = drain(&mut stage, &mut ws);
        assert_eq!(sorted(out), vec![3, 13, 53, 93, 103, 133, 153, 173]);
        assert_eq!(stage.stats().details["planned_whole_query"], json!(true));
    }

    #[test]
    fn test_conjunction_is_planned_whole() {
        let f = fixture(None);
        let query = CanonicalQuery::new().with_predicate(Predicate::eq("a", json!(3)));
        assert!(!SubplanStage::can_use_subplanning(&query));
        let mut stage = SubplanStage::new(query, f.planner.clone());
        let mut ws = WorkingSet::new();
        stage.pick_best_plan(&mut ws, &mut manual_policy(&f.txn)).unwrap();

        assert!(stage.planned_whole_query());
        assert_eq!(stage.best_plan_idx(), Some(1));
        assert_eq!(sorted(drain(&mut stage, &mut ws)), vec![3, 53, 103, 153]);
    }

    #[test]
    fn test_kill_during_clause_trial_is_not_retried() {
        let f = fixture(None);
        let manager = Arc::new(LocalTransactionManager::new(f.store.clone()));
        let kill = KillHandle::new();
        let every_work = YieldConfig {
            iterations: 1,
            period_ms: 60_000,
        };
        let mut policy = PlanYieldPolicy::new(YieldMode::Auto, &every_work, manager.begin(), kill.clone())
            .with_manager(manager);
        kill.kill();

        let mut stage = SubplanStage::new(disjunction(), f.planner.clone());
        let mut ws = WorkingSet::new();
        let err = stage.pick_best_plan(&mut ws, &mut policy).unwrap_err();
        assert!(err.is_killed());
        assert!(!stage.planned_whole_query());
        assert!(stage.is_eof());
        assert!(matches!(stage.work(&mut ws), StageState::Failure(_)));
    }

    #[test]
    fn test_selector_found_through_wrapping_stage() {
        let f = fixture(None);
        let subplan = SubplanStage::new(disjunction(), f.planner.clone());
        let mut root = crate::stage::LimitStage::new(Box::new(subplan), 2);
        let mut ws = WorkingSet::new();
        let selector = find_plan_selector(&mut root).unwrap();
        selector.pick_best_plan(&mut ws, &mut manual_policy(&f.txn)).unwrap();

        let mut seen = HashSet::new();
        loop {
            match root.work(&mut ws) {
                StageState::Advanced(id) => {
                    assert!(seen.insert(ws.get(id).record_id()));
                    ws.free(id);
                }
                StageState::NeedTime => {}
                StageState::IsEof => break,
                other => panic!("unexpected state {:?}", other),
            }
        }
        assert_eq!(seen.len(), 2);
    }
}
