//! Explain output for an executor

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::observability::MetricsSnapshot;
use crate::stage::PlanStageStats;

/// Stage statistics of the running tree plus the candidates that lost
/// plan selection
#[derive(Debug, Clone, Serialize)]
pub struct ExplainOutput {
    pub query_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub winning_plan: PlanStageStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected_plans: Vec<PlanStageStats>,
    pub metrics: MetricsSnapshot,
}

impl ExplainOutput {
    /// Serializes to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn write_tree(f: &mut fmt::Formatter<'_>, stats: &PlanStageStats, depth: usize) -> fmt::Result {
    let common = &stats.common;
    write!(
        f,
        "{:indent$}{} works={} advanced={} need_time={} need_fetch={}",
        "",
        stats.stage_type,
        common.works,
        common.advanced,
        common.need_time,
        common.need_fetch,
        indent = depth * 2
    )?;
    if common.is_eof {
        write!(f, " eof")?;
    }
    if common.failed {
        write!(f, " failed")?;
    }
    for (key, value) in &stats.details {
        // Nested details only appear in the JSON form
        if value.is_object() || value.is_array() {
            continue;
        }
        write!(f, " {}={}", key, value)?;
    }
    writeln!(f)?;
    for child in &stats.children {
        write_tree(f, child, depth + 1)?;
    }
    Ok(())
}

impl fmt::Display for ExplainOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "query {}", self.query_id)?;
        writeln!(f, "winning plan:")?;
        write_tree(f, &self.winning_plan, 1)?;
        for (i, rejected) in self.rejected_plans.iter().enumerate() {
            writeln!(f, "rejected plan {}:", i)?;
            write_tree(f, rejected, 1)?;
        }
        Ok(())
    }
}
