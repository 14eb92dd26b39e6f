//! Query-level inputs to execution: predicates, sort patterns, query
//! shapes and planner solutions

mod ast;
mod canonical;
mod comparator;
mod filter;
mod solution;

pub use ast::{FilterOp, Predicate, SortDirection, SortSpec};
pub use canonical::{CanonicalQuery, QueryShape};
pub use comparator::ValueComparator;
pub use filter::PredicateFilter;
pub use solution::QuerySolution;
