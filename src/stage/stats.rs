//! Per-stage execution statistics

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::{StageState, StageType};

/// Counters every stage keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommonStats {
    pub works: u64,
    pub advanced: u64,
    pub need_time: u64,
    pub need_fetch: u64,
    pub yields: u64,
    pub unyields: u64,
    pub invalidates: u64,
    pub is_eof: bool,
    pub failed: bool,
}

impl CommonStats {
    /// Counts one call to `work()` that returned `state`
    pub fn record(&mut self, state: &StageState) {
        self.works += 1;
        match state {
            StageState::Advanced(_) => self.advanced += 1,
            StageState::NeedTime => self.need_time += 1,
            StageState::NeedFetch(_) => self.need_fetch += 1,
            StageState::IsEof => self.is_eof = true,
            StageState::Failure(_) | StageState::Dead => self.failed = true,
        }
    }
}

/// Statistics for a stage and, recursively, its children.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStageStats {
    pub stage_type: StageType,
    pub common: CommonStats,
    /// Stage-specific counters, keyed by name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanStageStats>,
}

impl PlanStageStats {
    pub fn new(stage_type: StageType, common: CommonStats) -> Self {
        Self {
            stage_type,
            common,
            details: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Adds a stage-specific counter
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<PlanStageStats>) -> Self {
        self.children = children;
        self
    }

    /// Returns true if any stage in this tree is of type `stage_type`
    pub fn contains(&self, stage_type: StageType) -> bool {
        self.stage_type == stage_type || self.children.iter().any(|c| c.contains(stage_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::working_set::WorkingSet;

    #[test]
    fn test_record_counts_states() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate();
        let mut stats = CommonStats::default();
        stats.record(&StageState::NeedTime);
        stats.record(&StageState::Advanced(id));
        stats.record(&StageState::IsEof);

        assert_eq!(stats.works, 3);
        assert_eq!(stats.advanced, 1);
        assert_eq!(stats.need_time, 1);
        assert!(stats.is_eof);
        assert!(!stats.failed);
    }

    #[test]
    fn test_contains_searches_children() {
        let leaf = PlanStageStats::new(StageType::IndexScan, CommonStats::default());
        let root = PlanStageStats::new(StageType::Fetch, CommonStats::default())
            .with_children(vec![leaf]);
        assert!(root.contains(StageType::IndexScan));
        assert!(!root.contains(StageType::Sort));
    }
}
