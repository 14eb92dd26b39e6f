//! Observable execution events
//!
//! Events are explicit and typed. Every log line the engine writes names
//! one of these.

use std::fmt;

use super::logger::Severity;

/// Observable events in query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Plan selection
    /// Trial period started
    PlanSelectionBegin,
    /// Winner chosen
    PlanSelectionComplete,
    /// Every candidate failed or the executor was killed mid-trial
    PlanSelectionFailed,
    /// Two or more candidates scored within epsilon of the best
    PlanTie,
    /// The winner buffered nothing during the trial
    WinnerZeroResults,

    // Backup plans
    /// A non-blocking backup was kept for a blocking winner
    BackupPlanSelected,
    /// The winner produced a result; the backup is no longer needed
    BackupPlanDiscarded,
    /// The winner failed; execution continues on the backup
    BackupPlanFailover,

    // Plan cache
    /// Winner written to the plan cache
    PlanCached,
    /// Cache entry removed after the cached winner failed
    PlanUncached,

    // Disjunctions planned per clause
    /// A clause was planned from its cached winner
    SubplanBranchCached,
    /// Per-clause planning failed; the query is planned as a whole
    SubplanFallback,

    // Executor lifecycle
    /// Executor built and ready to serve results
    ExecutorCreated,
    /// Kill observed by the executor
    ExecutorKilled,
    /// Storage context released and reacquired
    ExecutorYield,

    // Proximity search
    /// Next search interval generated
    NearIntervalOpened,
    /// Density probe sized the first interval
    NearDensityEstimated,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PlanSelectionBegin => "PLAN_SELECTION_BEGIN",
            Event::PlanSelectionComplete => "PLAN_SELECTION_COMPLETE",
            Event::PlanSelectionFailed => "PLAN_SELECTION_FAILED",
            Event::PlanTie => "PLAN_TIE",
            Event::WinnerZeroResults => "WINNER_ZERO_RESULTS",

            Event::BackupPlanSelected => "BACKUP_PLAN_SELECTED",
            Event::BackupPlanDiscarded => "BACKUP_PLAN_DISCARDED",
            Event::BackupPlanFailover => "BACKUP_PLAN_FAILOVER",

            Event::PlanCached => "PLAN_CACHED",
            Event::PlanUncached => "PLAN_UNCACHED",

            Event::SubplanBranchCached => "SUBPLAN_BRANCH_CACHED",
            Event::SubplanFallback => "SUBPLAN_FALLBACK",

            Event::ExecutorCreated => "EXECUTOR_CREATED",
            Event::ExecutorKilled => "EXECUTOR_KILLED",
            Event::ExecutorYield => "EXECUTOR_YIELD",

            Event::NearIntervalOpened => "NEAR_INTERVAL_OPENED",
            Event::NearDensityEstimated => "NEAR_DENSITY_ESTIMATED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::PlanSelectionFailed => Severity::Error,
            Event::BackupPlanFailover | Event::ExecutorKilled | Event::SubplanFallback => {
                Severity::Warn
            }
            Event::ExecutorYield | Event::NearIntervalOpened => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::PlanSelectionBegin,
            Event::PlanSelectionComplete,
            Event::PlanSelectionFailed,
            Event::PlanTie,
            Event::WinnerZeroResults,
            Event::BackupPlanSelected,
            Event::BackupPlanDiscarded,
            Event::BackupPlanFailover,
            Event::PlanCached,
            Event::PlanUncached,
            Event::SubplanBranchCached,
            Event::SubplanFallback,
            Event::ExecutorCreated,
            Event::ExecutorKilled,
            Event::ExecutorYield,
            Event::NearIntervalOpened,
            Event::NearDensityEstimated,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
        }
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(Event::PlanSelectionFailed.severity(), Severity::Error);
        assert_eq!(Event::ExecutorKilled.severity(), Severity::Warn);
        assert_eq!(Event::ExecutorYield.severity(), Severity::Trace);
        assert_eq!(Event::PlanCached.severity(), Severity::Info);
    }

    #[test]
    fn test_scope_names_line_up_with_events() {
        assert_eq!(
            format!("{}_BEGIN", "PLAN_SELECTION"),
            Event::PlanSelectionBegin.as_str()
        );
        assert_eq!(Event::PlanSelectionComplete.to_string(), "PLAN_SELECTION_COMPLETE");
    }
}
