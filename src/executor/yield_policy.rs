//! When and how an executor gives up its storage context

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::transaction::{KillHandle, SharedTransactionManager};
use crate::config::{ExecutionConfig, YieldConfig};
use crate::observability::{log_event_with_fields, Event, ExecutionMetrics};
use crate::stage::{OperationContext, PlanStage};
use crate::storage::RecordId;
use crate::working_set::{force_fetch_all, WorkingSet};

/// Who decides when to yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldMode {
    /// The executor yields on its own schedule and for every fetch request
    Auto,
    /// The caller yields explicitly through `save_state`/`restore_state`
    Manual,
}

/// Result of a yield attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldOutcome {
    /// The stage tree was restored under a fresh context
    Alive,
    /// A kill arrived while the context was released; the tree was not
    /// restored and must not be worked again
    Killed,
}

/// Yield schedule plus the context the executor currently runs under.
///
/// `Auto` policies count `should_yield` calls and trip after the configured
/// number of iterations or once the period has elapsed since the last
/// yield. A policy without a transaction manager never releases anything;
/// fetch requests are then served by paging the record in under the
/// current context.
pub struct PlanYieldPolicy {
    mode: YieldMode,
    manager: Option<SharedTransactionManager>,
    txn: OperationContext,
    kill: KillHandle,
    iterations: u64,
    period: Duration,
    pings: u64,
    last_yield: Instant,
    force_fetch_on_save: bool,
    metrics: Option<Arc<ExecutionMetrics>>,
    yields: u64,
}

impl PlanYieldPolicy {
    pub fn new(mode: YieldMode, config: &YieldConfig, txn: OperationContext, kill: KillHandle) -> Self {
        Self {
            mode,
            manager: None,
            txn,
            kill,
            iterations: config.iterations.max(1),
            period: Duration::from_millis(config.period_ms),
            pings: 0,
            last_yield: Instant::now(),
            force_fetch_on_save: false,
            metrics: None,
            yields: 0,
        }
    }

    /// Policy with the yield schedule and force-fetch setting of `config`
    pub fn from_config(
        mode: YieldMode,
        config: &ExecutionConfig,
        txn: OperationContext,
        kill: KillHandle,
    ) -> Self {
        Self::new(mode, &config.yielding, txn, kill).with_force_fetch(config.force_fetch_on_save)
    }

    /// Releases and reacquires through `manager` on every yield
    pub fn with_manager(mut self, manager: SharedTransactionManager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Reads index-located documents into the working set before saving
    pub fn with_force_fetch(mut self, force_fetch_on_save: bool) -> Self {
        self.force_fetch_on_save = force_fetch_on_save;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn mode(&self) -> YieldMode {
        self.mode
    }

    /// Context the stage tree currently holds
    pub fn context(&self) -> &OperationContext {
        &self.txn
    }

    /// Replaces the current context after a caller-driven restore
    pub fn set_context(&mut self, txn: OperationContext) {
        self.txn = txn;
    }

    pub fn kill_handle(&self) -> &KillHandle {
        &self.kill
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_killed()
    }

    pub fn force_fetch_on_save(&self) -> bool {
        self.force_fetch_on_save
    }

    /// Number of yields performed through this policy
    pub fn yields(&self) -> u64 {
        self.yields
    }

    /// Counts one unit of work and reports whether a timed yield is due
    pub fn should_yield(&mut self) -> bool {
        if self.mode != YieldMode::Auto {
            return false;
        }
        self.pings += 1;
        self.pings >= self.iterations || self.last_yield.elapsed() >= self.period
    }

    /// Restarts the yield schedule
    pub fn reset_timer(&mut self) {
        self.pings = 0;
        self.last_yield = Instant::now();
    }

    /// Yields the storage context around `stage`, honouring `fetch` while
    /// it is released.
    ///
    /// With nothing to release, a pending fetch is paged in under the
    /// current context and the tree is left untouched.
    pub fn yield_stage(
        &mut self,
        stage: &mut dyn PlanStage,
        ws: &mut WorkingSet,
        fetch: Option<RecordId>,
    ) -> YieldOutcome {
        let manager = match (&self.manager, self.mode) {
            (Some(manager), YieldMode::Auto) => manager.clone(),
            _ => {
                if let Some(record_id) = fetch {
                    self.txn.store().page_in(record_id);
                }
                self.reset_timer();
                return if self.is_killed() {
                    YieldOutcome::Killed
                } else {
                    YieldOutcome::Alive
                };
            }
        };

        if self.force_fetch_on_save {
            force_fetch_all(&self.txn, ws);
        }
        stage.save_state();

        manager.release();
        if let Some(record_id) = fetch {
            manager.fetch_unlocked(record_id);
        }
        self.txn = manager.reacquire();

        self.yields += 1;
        if let Some(metrics) = &self.metrics {
            metrics.increment_yields(fetch.is_some());
        }
        let epoch = self.txn.epoch().to_string();
        log_event_with_fields(
            Event::ExecutorYield,
            &[("epoch", epoch.as_str()), ("for_fetch", if fetch.is_some() { "true" } else { "false" })],
        );

        if self.is_killed() {
            return YieldOutcome::Killed;
        }
        stage.restore_state(&self.txn);
        self.reset_timer();
        YieldOutcome::Alive
    }
}
