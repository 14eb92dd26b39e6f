//! Plan executor
//!
//! Owns a stage tree and its working set and turns the stage protocol into
//! a pull interface:
//!
//! 1. On construction, run plan selection if the tree contains a selector
//! 2. On every `get_next`, check for a kill, yield if due, work the root
//! 3. Translate the root's state into `Advanced`, `Eof`, `Dead` or `Failure`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::{ExecutorError, ExecutorResult};
use super::explain::ExplainOutput;
use super::result::{ExecutionResult, ResultDocument};
use super::transaction::KillHandle;
use super::yield_policy::{PlanYieldPolicy, YieldOutcome};
use crate::observability::{log_event_with_fields, Event, ExecutionMetrics};
use crate::stage::{find_plan_selector, InvalidationType, OperationContext, PlanStage, StageState};
use crate::storage::RecordId;
use crate::working_set::{force_fetch_all, member_status, WorkingSet, WorkingSetId};

/// Outcome of [`PlanExecutor::get_next`]
#[derive(Debug, Clone, PartialEq)]
pub enum GetNext {
    /// The next result
    Advanced(ResultDocument),
    /// No more results
    Eof,
    /// The executor was killed; every later call answers `Dead` too
    Dead,
    /// Execution failed
    Failure(ExecutorError),
}

/// Drives one query's stage tree to completion.
pub struct PlanExecutor {
    query_id: Uuid,
    started_at: DateTime<Utc>,
    root: Box<dyn PlanStage>,
    ws: WorkingSet,
    policy: PlanYieldPolicy,
    metrics: Arc<ExecutionMetrics>,
    /// Fetch requested by the last `NeedFetch`, honoured before the next work
    pending_fetch: Option<RecordId>,
    fetch_due: bool,
    dead: bool,
    works: u64,
}

impl PlanExecutor {
    /// Builds an executor, running plan selection first if the tree has a
    /// selecting stage
    pub fn make(
        root: Box<dyn PlanStage>,
        ws: WorkingSet,
        policy: PlanYieldPolicy,
    ) -> ExecutorResult<Self> {
        Self::make_with_metrics(root, ws, policy, Arc::new(ExecutionMetrics::new()))
    }

    pub fn make_with_metrics(
        root: Box<dyn PlanStage>,
        ws: WorkingSet,
        policy: PlanYieldPolicy,
        metrics: Arc<ExecutionMetrics>,
    ) -> ExecutorResult<Self> {
        let mut executor = Self {
            query_id: Uuid::new_v4(),
            started_at: Utc::now(),
            root,
            ws,
            policy: policy.with_metrics(metrics.clone()),
            metrics,
            pending_fetch: None,
            fetch_due: false,
            dead: false,
            works: 0,
        };

        if let Some(selector) = find_plan_selector(executor.root.as_mut()) {
            selector.pick_best_plan(&mut executor.ws, &mut executor.policy)?;
        }

        let query_id = executor.query_id.to_string();
        let root_stage = executor.root.stage_type().to_string();
        log_event_with_fields(
            Event::ExecutorCreated,
            &[("query_id", query_id.as_str()), ("root", root_stage.as_str())],
        );
        Ok(executor)
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.metrics
    }

    /// Handle through which the surrounding system can kill this executor
    pub fn kill_handle(&self) -> KillHandle {
        self.policy.kill_handle().clone()
    }

    /// Context the tree currently runs under
    pub fn context(&self) -> &OperationContext {
        self.policy.context()
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.ws
    }

    /// Number of yields performed so far
    pub fn yields(&self) -> u64 {
        self.policy.yields()
    }

    pub fn is_eof(&self) -> bool {
        self.dead || self.policy.is_killed() || self.root.is_eof()
    }

    /// Kills the executor. The stage tree is not touched again.
    pub fn kill(&mut self, reason: &str) {
        self.policy.kill_handle().kill();
        self.mark_dead(reason);
    }

    fn mark_dead(&mut self, reason: &str) -> GetNext {
        if !self.dead {
            self.dead = true;
            let query_id = self.query_id.to_string();
            log_event_with_fields(
                Event::ExecutorKilled,
                &[("query_id", query_id.as_str()), ("reason", reason)],
            );
        }
        GetNext::Dead
    }

    /// Prepares the tree for a caller-driven yield
    pub fn save_state(&mut self) {
        if self.dead {
            return;
        }
        if self.policy.force_fetch_on_save() {
            force_fetch_all(self.policy.context(), &mut self.ws);
        }
        self.root.save_state();
    }

    /// Resumes the tree under `txn` after a caller-driven yield.
    ///
    /// Fails without touching the tree if the executor was killed while
    /// yielded.
    pub fn restore_state(&mut self, txn: &OperationContext) -> ExecutorResult<()> {
        if self.dead || self.policy.is_killed() {
            self.mark_dead("killed while yielded");
            return Err(ExecutorError::killed("executor killed while yielded"));
        }
        self.policy.set_context(txn.clone());
        self.root.restore_state(txn);
        self.policy.reset_timer();
        Ok(())
    }

    /// Forwards an invalidation for `record_id` to the whole tree.
    ///
    /// `txn` must still see the record.
    pub fn invalidate(&mut self, txn: &OperationContext, record_id: RecordId, kind: InvalidationType) {
        if self.dead {
            return;
        }
        self.root.invalidate(txn, &mut self.ws, record_id, kind);
        self.metrics.increment_invalidations();
    }

    fn to_result(&self, id: WorkingSetId) -> ResultDocument {
        let entry = self.ws.get(id);
        let document = match entry.document() {
            Some(doc) => doc.clone(),
            None => {
                let keys: Map<String, Value> = entry
                    .key_data()
                    .iter()
                    .map(|k| (k.key_pattern.clone(), k.key.to_value()))
                    .collect();
                Value::Object(keys)
            }
        };
        let result = ResultDocument::new(entry.record_id(), document);
        match entry.distance() {
            Some(distance) => result.with_distance(distance),
            None => result,
        }
    }

    /// Returns the next result
    pub fn get_next(&mut self) -> GetNext {
        if self.dead {
            return GetNext::Dead;
        }

        loop {
            if self.policy.is_killed() {
                return self.mark_dead("kill observed before work");
            }

            if self.fetch_due || self.policy.should_yield() {
                self.fetch_due = false;
                let fetch = self.pending_fetch.take();
                if self.policy.yield_stage(self.root.as_mut(), &mut self.ws, fetch)
                    == YieldOutcome::Killed
                {
                    return self.mark_dead("kill observed during yield");
                }
            }

            self.works += 1;
            self.metrics.increment_works();
            match self.root.work(&mut self.ws) {
                StageState::Advanced(id) => {
                    // Invalidated results held back for review are not returned
                    if self.ws.is_flagged(id) {
                        self.ws.free(id);
                        continue;
                    }
                    let result = self.to_result(id);
                    self.ws.free(id);
                    self.metrics.increment_advanced();
                    return GetNext::Advanced(result);
                }
                StageState::NeedFetch(id) => {
                    let entry = self.ws.get_mut(id);
                    self.pending_fetch = entry.take_fetch_request().or(entry.record_id());
                    self.fetch_due = true;
                }
                StageState::NeedTime => {}
                StageState::IsEof => return GetNext::Eof,
                StageState::Dead => return self.mark_dead("stage tree reported dead"),
                StageState::Failure(id) => {
                    let error = member_status(&self.ws, id);
                    if !self.ws.is_free(id) {
                        self.ws.free(id);
                    }
                    return GetNext::Failure(error);
                }
            }
        }
    }

    /// Drains the executor
    pub fn execute_plan(&mut self) -> ExecutorResult<ExecutionResult> {
        let mut result = ExecutionResult::empty();
        loop {
            match self.get_next() {
                GetNext::Advanced(doc) => result.documents.push(doc),
                GetNext::Eof => break,
                GetNext::Dead => return Err(ExecutorError::killed("executor killed")),
                GetNext::Failure(error) => return Err(error),
            }
        }
        result.works = self.works;
        result.yields = self.policy.yields();
        Ok(result)
    }

    /// Statistics of the tree and of any rejected candidate plans
    pub fn explain(&mut self) -> ExplainOutput {
        let rejected_plans = find_plan_selector(self.root.as_mut())
            .map(|selector| selector.candidate_stats())
            .unwrap_or_default();
        ExplainOutput {
            query_id: self.query_id,
            started_at: self.started_at,
            winning_plan: self.root.stats(),
            rejected_plans,
            metrics: self.metrics.snapshot(),
        }
    }
}
