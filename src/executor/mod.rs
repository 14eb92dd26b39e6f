//! Query driver
//!
//! [`PlanExecutor`] owns a stage tree and a working set and hands out one
//! result per [`PlanExecutor::get_next`] call.
//!
//! # Yielding
//!
//! Yields are decided by a [`PlanYieldPolicy`]. Around each yield the tree
//! is saved, the storage context is released through a
//! [`TransactionManager`], a pending fetch is served, and the tree is
//! restored under the fresh context.
//!
//! # Killing
//!
//! A [`KillHandle`] may be tripped from any thread. The executor checks it
//! before every unit of work and after every yield, and answers `Dead` from
//! then on without touching the tree again.

mod errors;
mod executor;
mod explain;
mod result;
mod transaction;
mod yield_policy;

pub use errors::{ExecutorError, ExecutorErrorCode, ExecutorResult, Severity};
pub use executor::{GetNext, PlanExecutor};
pub use explain::ExplainOutput;
pub use result::{ExecutionResult, ResultDocument};
pub use transaction::{KillHandle, LocalTransactionManager, SharedTransactionManager, TransactionManager};
pub use yield_policy::{PlanYieldPolicy, YieldMode, YieldOutcome};
