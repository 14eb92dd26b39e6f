//! aerodb-exec - pull-based query execution for aerodb
//!
//! A query runs as a tree of resumable stages sharing one working set. A
//! [`executor::PlanExecutor`] drives the tree, yields the storage context
//! cooperatively, and delivers invalidations and kills.

pub mod config;
pub mod executor;
pub mod multi_plan;
pub mod near;
pub mod observability;
pub mod query;
pub mod stage;
pub mod storage;
pub mod working_set;
