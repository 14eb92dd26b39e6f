//! Search intervals and their statistics

use serde::Serialize;

use crate::config::NearConfig;
use crate::stage::PlanStage;

/// One ring of a proximity search together with the stage that
/// enumerates its candidates.
///
/// Only results with `min_distance <= d < max_distance` are kept, or
/// `d <= max_distance` when `inclusive_max` is set on the last interval.
pub struct CoveredInterval {
    pub covering: Box<dyn PlanStage>,
    /// The covering stage may return a record more than once
    pub dedup_covering: bool,
    pub min_distance: f64,
    pub max_distance: f64,
    pub inclusive_max: bool,
}

impl CoveredInterval {
    pub fn new(
        covering: Box<dyn PlanStage>,
        dedup_covering: bool,
        min_distance: f64,
        max_distance: f64,
        inclusive_max: bool,
    ) -> Self {
        Self {
            covering,
            dedup_covering,
            min_distance,
            max_distance,
            inclusive_max,
        }
    }

    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.min_distance
            && if self.inclusive_max {
                distance <= self.max_distance
            } else {
                distance < self.max_distance
            }
    }
}

/// What one interval found
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalStats {
    pub num_results_found: u64,
    pub num_results_buffered: u64,
    pub min_distance_allowed: f64,
    pub max_distance_allowed: f64,
    pub inclusive_max_distance_allowed: bool,
    pub min_distance_found: Option<f64>,
    pub max_distance_found: Option<f64>,
    pub min_distance_buffered: Option<f64>,
    pub max_distance_buffered: Option<f64>,
}

fn widen(lo: &mut Option<f64>, hi: &mut Option<f64>, distance: f64) {
    *lo = Some(lo.map_or(distance, |v| v.min(distance)));
    *hi = Some(hi.map_or(distance, |v| v.max(distance)));
}

impl IntervalStats {
    pub fn for_interval(interval: &CoveredInterval) -> Self {
        Self {
            min_distance_allowed: interval.min_distance,
            max_distance_allowed: interval.max_distance,
            inclusive_max_distance_allowed: interval.inclusive_max,
            ..Self::default()
        }
    }

    pub fn record_found(&mut self, distance: f64) {
        widen(&mut self.min_distance_found, &mut self.max_distance_found, distance);
    }

    pub fn record_buffered(&mut self, distance: f64) {
        self.num_results_buffered += 1;
        widen(&mut self.min_distance_buffered, &mut self.max_distance_buffered, distance);
    }
}

/// Proximity search statistics kept for explain output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NearStats {
    pub index_name: String,
    pub key_pattern: String,
    /// One entry per completed interval, in search order
    pub intervals: Vec<IntervalStats>,
}

impl NearStats {
    pub fn last_interval(&self) -> Option<&IntervalStats> {
        self.intervals.last()
    }

    /// Width of the next interval given the current `increment`: doubled
    /// if the last interval buffered fewer than the low watermark, halved
    /// if it buffered more than the high one. Never below `floor`.
    pub fn next_increment(&self, increment: f64, config: &NearConfig, floor: f64) -> f64 {
        let scaled = match self.last_interval() {
            Some(last) if last.num_results_buffered < config.low_buffer_watermark => increment * 2.0,
            Some(last) if last.num_results_buffered > config.high_buffer_watermark => increment / 2.0,
            _ => increment,
        };
        scaled.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::QueuedDataStage;

    #[test]
    fn test_interval_bounds() {
        let open = CoveredInterval::new(Box::new(QueuedDataStage::new()), false, 1.0, 2.0, false);
        assert!(open.contains(1.0));
        assert!(!open.contains(2.0));

        let closed = CoveredInterval::new(Box::new(QueuedDataStage::new()), false, 1.0, 2.0, true);
        assert!(closed.contains(2.0));
        assert!(!closed.contains(0.99));
    }

    #[test]
    fn test_stats_track_extremes() {
        let mut stats = IntervalStats::default();
        stats.record_found(3.0);
        stats.record_found(1.0);
        stats.record_buffered(1.0);
        assert_eq!(stats.min_distance_found, Some(1.0));
        assert_eq!(stats.max_distance_found, Some(3.0));
        assert_eq!(stats.num_results_buffered, 1);
        assert_eq!(stats.max_distance_buffered, Some(1.0));
    }
}
