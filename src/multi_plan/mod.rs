//! Plan competition
//!
//! When the planner produces more than one candidate plan for a query, the
//! candidates race each other for a short trial and the most productive
//! one serves the rest of the query.
//!
//! # Trial
//!
//! - Each round works every live candidate once
//! - A round budget scales with collection size, with a fixed floor
//! - The trial ends early when a candidate reaches EOF or has buffered
//!   enough results
//! - A failing candidate is dropped; the trial fails only when all fail
//!
//! # After the trial
//!
//! - The winner's buffered results are returned first
//! - A blocking winner with nothing buffered keeps the best non-blocking
//!   candidate on standby and falls back to it if the winner fails
//! - A clear winner with results is written to the plan cache
//!
//! # Disjunctions
//!
//! [`SubplanStage`] plans each clause of a disjunction on its own, caches
//! clause winners under the clause shape, and unions the winners. It falls
//! back to planning the whole query when a clause cannot be planned.

mod cache;
mod candidate;
mod ranker;
mod stage;
mod subplan;

pub use cache::{CachedSolution, InMemoryPlanCache, PlanCache, SharedPlanCache};
pub use candidate::CandidatePlan;
pub use ranker::{PlanRanker, ProductivityRanker, RankingDecision, EOF_BONUS, TIE_EPSILON};
pub use stage::{MultiPlanStage, PlanSelector};
pub use subplan::{QueryPlanner, SharedQueryPlanner, SubplanStage};
