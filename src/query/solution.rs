//! Planner output describing one candidate execution strategy

use serde::{Deserialize, Serialize};

/// Describes a candidate plan. The stage tree itself travels separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySolution {
    /// Human-readable plan summary, e.g. `"FETCH <- IXSCAN a_1"`
    pub summary: String,
    /// Whether the plan must consume all input before producing output
    pub has_blocking_stage: bool,
    /// Opaque data a planner can rebuild the plan from; `None` if the plan
    /// cannot be cached
    pub cache_data: Option<String>,
}

impl QuerySolution {
    /// A non-blocking solution that can be rebuilt from its summary
    pub fn new(summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            cache_data: Some(summary.clone()),
            summary,
            has_blocking_stage: false,
        }
    }

    pub fn blocking(mut self) -> Self {
        self.has_blocking_stage = true;
        self
    }

    pub fn without_cache_data(mut self) -> Self {
        self.cache_data = None;
        self
    }
}
