//! Proximity search over a 2D grid index
//!
//! Supports two distance models:
//! - `Flat`: Euclidean distance in index coordinates
//! - `Sphere`: great-circle distance in metres over longitude/latitude
//!
//! Each interval is covered by index cells, fetched, and filtered by the
//! user predicates before the exact distance decides whether it is kept.

use std::sync::Arc;

use super::density::{DensityEstimator, DensityProbe};
use super::geohash::GeoHashConverter;
use super::geometry::{
    points_from_value, x_scan_distance, Annulus, Point, EARTH_RADIUS_METERS,
    MAX_EARTH_DISTANCE_METERS, METERS_PER_DEGREE,
};
use super::interval::{CoveredInterval, NearStats};
use super::stage::NearSearch;
use crate::config::NearConfig;
use crate::executor::{ExecutorError, ExecutorResult};
use crate::observability::{log_event_with_fields, Event};
use crate::query::Predicate;
use crate::stage::{
    FetchStage, IndexScan, IndexScanParams, InvalidationType, KeyFilter, OperationContext,
    StageState, StageType,
};
use crate::storage::{field_at, IndexKey, RecordId, SharedIndex};
use crate::working_set::{ComputedData, WorkingSet, WorkingSetEntry};

/// Distance model of a proximity query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Euclidean, in index units
    Flat,
    /// Great-circle, in metres
    Sphere,
}

/// What a 2D proximity query asks for
#[derive(Debug, Clone)]
pub struct GeoNearParams {
    /// Field holding the indexed locations
    pub field: String,
    pub center: Point,
    pub crs: Crs,
    pub min_distance: f64,
    pub max_distance: f64,
    /// Extra predicates every result must satisfy
    pub filter: Vec<Predicate>,
}

impl GeoNearParams {
    /// Unbounded flat search around `center`
    pub fn flat(field: impl Into<String>, center: Point) -> Self {
        Self {
            field: field.into(),
            center,
            crs: Crs::Flat,
            min_distance: 0.0,
            max_distance: f64::INFINITY,
            filter: Vec::new(),
        }
    }

    /// Unbounded spherical search around `center` (longitude, latitude)
    pub fn sphere(field: impl Into<String>, center: Point) -> Self {
        Self {
            crs: Crs::Sphere,
            ..Self::flat(field, center)
        }
    }

    pub fn with_min_distance(mut self, min_distance: f64) -> Self {
        self.min_distance = min_distance;
        self
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_filter(mut self, filter: Vec<Predicate>) -> Self {
        self.filter = filter;
        self
    }

    pub(super) fn validate(&self) -> ExecutorResult<()> {
        if !self.center.is_finite() {
            return Err(ExecutorError::bad_geometry("near centre must be finite"));
        }
        if self.crs == Crs::Sphere && (self.center.x.abs() > 180.0 || self.center.y.abs() > 90.0) {
            return Err(ExecutorError::bad_geometry(format!(
                "spherical centre ({}, {}) is not a longitude/latitude pair",
                self.center.x, self.center.y
            )));
        }
        if self.min_distance.is_nan() || self.min_distance < 0.0 {
            return Err(ExecutorError::bad_geometry("min distance must be non-negative"));
        }
        if self.max_distance.is_nan() || self.max_distance < self.min_distance {
            return Err(ExecutorError::bad_geometry("max distance below min distance"));
        }
        Ok(())
    }
}

/// Interval generator and distance function for a 2D grid index.
pub struct GeoNear2dSearch {
    params: GeoNearParams,
    index: SharedIndex,
    converter: GeoHashConverter,
    config: NearConfig,
    full_bounds: Annulus,
    /// Outer edge of the last interval handed out, `None` before the first
    current_outer: Option<f64>,
    bounds_increment: f64,
    estimator: Option<DensityEstimator>,
}

impl GeoNear2dSearch {
    pub fn new(
        params: GeoNearParams,
        index: SharedIndex,
        converter: GeoHashConverter,
        config: &NearConfig,
    ) -> ExecutorResult<Self> {
        params.validate()?;
        let full_bounds = match params.crs {
            Crs::Flat => {
                // Nothing in the indexed square is farther than its diagonal
                let diagonal = 1.5 * (converter.max() - converter.min());
                Annulus::new(params.center, params.min_distance, params.max_distance.min(diagonal))
            }
            Crs::Sphere => Annulus::new(
                params.center,
                params.min_distance.min(MAX_EARTH_DISTANCE_METERS),
                params.max_distance.min(MAX_EARTH_DISTANCE_METERS),
            ),
        };
        Ok(Self {
            params,
            index,
            converter,
            config: config.clone(),
            full_bounds,
            current_outer: None,
            bounds_increment: 0.0,
            estimator: None,
        })
    }

    pub fn full_bounds(&self) -> &Annulus {
        &self.full_bounds
    }

    /// Width of the next interval before feedback is applied
    pub fn bounds_increment(&self) -> f64 {
        self.bounds_increment
    }

    /// No interval is narrower than half a finest cell's diagonal
    fn min_bounds_increment(&self) -> f64 {
        let increment = self.converter.error() / 2.0;
        match self.params.crs {
            Crs::Flat => increment,
            Crs::Sphere => increment * METERS_PER_DEGREE,
        }
    }

    /// Index-space annulus covering a spherical interval
    fn project_to_degrees(&self, bounds: &Annulus) -> Annulus {
        let outer = (bounds.outer / EARTH_RADIUS_METERS).to_degrees();
        let inner = (bounds.inner / EARTH_RADIUS_METERS).to_degrees();
        let max_error = x_scan_distance(bounds.center.y, outer);
        Annulus::new(bounds.center, (inner - max_error).max(0.0), outer + max_error)
    }

    fn covering_stage(&self, txn: &OperationContext, cover: Annulus) -> FetchStage {
        let cells = self.converter.cover(&cover, self.config.max_covering_cells);
        let ranges = self.converter.ranges_for(&cells);

        // A document may have one key inside the ring and another outside,
        // so keys are filtered individually and records deduplicated later
        let converter = self.converter;
        let key_filter: KeyFilter = Arc::new(move |key: &IndexKey| match key {
            IndexKey::GeoHash(hash) => !cover.is_disjoint(&converter.unhash_box(*hash)),
            _ => false,
        });
        let scan = IndexScan::new(
            txn,
            IndexScanParams::new(self.index.clone(), ranges).with_key_filter(key_filter),
        );
        FetchStage::new(txn, Box::new(scan), self.params.filter.clone())
    }
}

impl NearSearch for GeoNear2dSearch {
    fn initialize(&mut self, txn: &OperationContext, ws: &mut WorkingSet) -> StageState {
        let (index, converter, center) = (self.index.clone(), self.converter, self.params.center);
        let estimator = self
            .estimator
            .get_or_insert_with(|| DensityEstimator::new(index, converter, center));

        let estimate = match estimator.work(txn, ws) {
            DensityProbe::NeedTime => return StageState::NeedTime,
            DensityProbe::Failure(id) => return StageState::Failure(id),
            DensityProbe::Done(estimate) => estimate,
        };
        let level = estimator.level().to_string();

        // Start with three cell edges: the nearest key is at least half an
        // edge away, and the ring is widened later if it comes up short
        self.bounds_increment = match self.params.crs {
            Crs::Flat => 3.0 * estimate,
            Crs::Sphere => (estimate.to_radians() * EARTH_RADIUS_METERS * 3.0)
                .min(MAX_EARTH_DISTANCE_METERS / 1000.0),
        };
        self.estimator = None;

        let increment = self.bounds_increment.to_string();
        log_event_with_fields(
            Event::NearDensityEstimated,
            &[("level", level.as_str()), ("bounds_increment", increment.as_str())],
        );
        StageState::IsEof
    }

    fn next_interval(
        &mut self,
        txn: &OperationContext,
        _ws: &mut WorkingSet,
        stats: &NearStats,
    ) -> ExecutorResult<Option<CoveredInterval>> {
        let full = self.full_bounds;
        let inner = match self.current_outer {
            Some(outer) if outer == full.outer => return Ok(None),
            Some(outer) => outer,
            None => full.inner,
        };

        self.bounds_increment =
            stats.next_increment(self.bounds_increment, &self.config, self.min_bounds_increment());

        let outer = (inner + self.bounds_increment).min(full.outer);
        let mut next = Annulus::new(full.center, inner, outer);
        let is_last = next.outer == full.outer;
        self.current_outer = Some(next.outer);

        let cover = match self.params.crs {
            Crs::Flat => {
                // Containment and distance round differently near the overall
                // edges; only those edges are widened, inner edges stay exact
                let epsilon = f64::EPSILON
                    * (full.center.x.abs().max(full.center.y.abs()) + full.outer);
                if next.inner > 0.0 && next.inner == full.inner {
                    next.inner = (next.inner - epsilon).max(0.0);
                }
                if next.outer > 0.0 && next.outer == full.outer {
                    next.outer += epsilon;
                }
                Annulus::new(next.center, (next.inner - epsilon).max(0.0), next.outer + epsilon)
            }
            Crs::Sphere => self.project_to_degrees(&next),
        };

        let covering = self.covering_stage(txn, cover);
        Ok(Some(CoveredInterval::new(
            Box::new(covering),
            true,
            next.inner,
            next.outer,
            is_last,
        )))
    }

    fn compute_distance(&self, entry: &mut WorkingSetEntry) -> ExecutorResult<Option<f64>> {
        let points = match entry.document().and_then(|doc| field_at(doc, &self.params.field)) {
            Some(value) => points_from_value(value),
            None => Vec::new(),
        };
        if points.is_empty() {
            return Err(ExecutorError::bad_geometry(format!(
                "no location found in field '{}'",
                self.params.field
            )));
        }

        let center = self.params.center;
        let nearest = points
            .iter()
            .filter(|p| self.params.crs == Crs::Sphere || self.full_bounds.contains(p))
            .map(|p| {
                let d = match self.params.crs {
                    Crs::Flat => center.distance(p),
                    Crs::Sphere => center.sphere_distance(p),
                };
                (d, *p)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        Ok(nearest.map(|(distance, point)| {
            entry.add_computed(ComputedData::Distance(distance));
            entry.add_computed(ComputedData::NearPoint(point.to_value()));
            distance
        }))
    }

    fn stage_type(&self) -> StageType {
        StageType::GeoNear2d
    }

    fn describe(&self, stats: &mut NearStats) {
        stats.index_name = self.index.name().to_string();
        stats.key_pattern = self.index.key_pattern().to_string();
    }

    fn save_search_state(&mut self) {
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.save_state();
        }
    }

    fn restore_search_state(&mut self, txn: &OperationContext) {
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.restore_state(txn);
        }
    }

    fn invalidate_search_state(
        &mut self,
        txn: &OperationContext,
        ws: &mut WorkingSet,
        record_id: RecordId,
        kind: InvalidationType,
    ) {
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.invalidate(txn, ws, record_id, kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::near::{IntervalStats, NearStage};
    use crate::stage::PlanStage;
    use crate::storage::{MemoryIndex, MemoryRecordStore};

    fn setup(points: Vec<serde_json::Value>) -> (OperationContext, SharedIndex) {
        let store = Arc::new(MemoryRecordStore::with_documents(
            points.into_iter().enumerate().map(|(i, p)| json!({ "i": i, "loc": p })),
        ));
        let index = MemoryIndex::geo_2d("loc_2d", "loc", GeoHashConverter::default());
        index.build_from(store.as_ref());
        (OperationContext::new(store, 0), Arc::new(index))
    }

    fn run(txn: &OperationContext, index: SharedIndex, params: GeoNearParams) -> Vec<(i64, f64)> {
        let search = GeoNear2dSearch::new(
            params,
            index,
            GeoHashConverter::default(),
            &NearConfig::default(),
        )
        .unwrap();
        let mut stage = NearStage::new(txn, search);
        let mut ws = WorkingSet::new();
        let mut out = Vec::new();
        for _ in 0..100_000 {
            match stage.work(&mut ws) {
                StageState::Advanced(id) => {
                    let entry = ws.get(id);
                    out.push((
                        entry.document().unwrap()["i"].as_i64().unwrap(),
                        entry.distance().unwrap(),
                    ));
                    ws.free(id);
                }
                StageState::NeedTime => {}
                StageState::IsEof => return out,
                other => panic!("unexpected state {:?}", other),
            }
        }
        panic!("search did not terminate");
    }

    #[test]
    fn test_flat_nearest_order() {
        let (txn, index) = setup(vec![
            json!([1, 0]),
            json!([2, 0]),
            json!([0, 3]),
            json!([10, 10]),
            json!([0, 0.5]),
        ]);
        let out = run(&txn, index, GeoNearParams::flat("loc", Point::new(0.0, 0.0)));
        let order: Vec<i64> = out.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![4, 0, 1, 2, 3]);
        assert!((out[4].1 - 200f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_min_and_max_distance() {
        let (txn, index) = setup((0..10).map(|i| json!([i, 0])).collect());
        let params = GeoNearParams::flat("loc", Point::new(0.0, 0.0))
            .with_min_distance(2.0)
            .with_max_distance(5.0);
        let out: Vec<i64> = run(&txn, index, params).into_iter().map(|(i, _)| i).collect();
        assert_eq!(out, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_multi_location_document_returned_once() {
        let (txn, index) = setup(vec![json!([[5, 0], [1, 0]]), json!([3, 0])]);
        let out = run(&txn, index, GeoNearParams::flat("loc", Point::new(0.0, 0.0)));
        assert_eq!(out, vec![(0, 1.0), (1, 3.0)]);
    }

    #[test]
    fn test_filter_applies() {
        let (txn, index) = setup((0..6).map(|i| json!([i, i])).collect());
        let params = GeoNearParams::flat("loc", Point::new(0.0, 0.0))
            .with_filter(vec![Predicate::gte("i", json!(3))]);
        let out: Vec<i64> = run(&txn, index, params).into_iter().map(|(i, _)| i).collect();
        assert_eq!(out, vec![3, 4, 5]);
    }

    #[test]
    fn test_sphere_distances_in_metres() {
        let (txn, index) = setup(vec![json!([0, 1]), json!([0.5, 0]), json!([-2, 0])]);
        let out = run(&txn, index, GeoNearParams::sphere("loc", Point::new(0.0, 0.0)));
        let order: Vec<i64> = out.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert!((out[0].1 - 0.5 * METERS_PER_DEGREE).abs() < 10.0);
    }

    #[test]
    fn test_rejects_bad_params() {
        let (_txn, index) = setup(Vec::new());
        let bad = GeoNearParams::flat("loc", Point::new(0.0, 0.0))
            .with_min_distance(5.0)
            .with_max_distance(1.0);
        let config = NearConfig::default();
        let err = GeoNear2dSearch::new(bad, index.clone(), GeoHashConverter::default(), &config)
            .err()
            .unwrap();
        assert_eq!(err.code(), crate::executor::ExecutorErrorCode::AeroBadGeometry);

        let off_globe = GeoNearParams::sphere("loc", Point::new(0.0, 95.0));
        assert!(
            GeoNear2dSearch::new(off_globe, index, GeoHashConverter::default(), &config).is_err()
        );
    }

    fn finished(buffered: u64) -> IntervalStats {
        IntervalStats {
            num_results_buffered: buffered,
            ..IntervalStats::default()
        }
    }

    #[test]
    fn test_interval_width_follows_buffer_watermarks() {
        let (txn, index) = setup(Vec::new());
        let config = NearConfig {
            low_buffer_watermark: 2,
            high_buffer_watermark: 4,
            ..NearConfig::default()
        };
        let params = GeoNearParams::flat("loc", Point::new(0.0, 0.0));
        let mut search =
            GeoNear2dSearch::new(params, index, GeoHashConverter::default(), &config).unwrap();
        search.bounds_increment = 1.0;
        let mut ws = WorkingSet::new();
        let mut stats = NearStats::default();

        let mut next = |search: &mut GeoNear2dSearch, stats: &NearStats| {
            let interval = search.next_interval(&txn, &mut ws, stats).unwrap().unwrap();
            (interval.min_distance, interval.max_distance)
        };

        // No feedback before the first interval
        assert_eq!(next(&mut search, &stats), (0.0, 1.0));
        assert_eq!(search.bounds_increment(), 1.0);

        // Too few buffered: double
        stats.intervals.push(finished(1));
        assert_eq!(next(&mut search, &stats), (1.0, 3.0));
        assert_eq!(search.bounds_increment(), 2.0);

        // Within the watermarks: unchanged
        stats.intervals.push(finished(3));
        assert_eq!(next(&mut search, &stats), (3.0, 5.0));
        assert_eq!(search.bounds_increment(), 2.0);

        // Too many buffered: halve
        stats.intervals.push(finished(5));
        assert_eq!(next(&mut search, &stats), (5.0, 6.0));
        assert_eq!(search.bounds_increment(), 1.0);

        // Halving never goes below half a finest cell's diagonal
        search.bounds_increment = 1e-9;
        stats.intervals.push(finished(5));
        next(&mut search, &stats);
        let floor = GeoHashConverter::default().error() / 2.0;
        assert_eq!(search.bounds_increment(), floor);
    }

    #[test]
    fn test_empty_collection_is_eof() {
        let (txn, index) = setup(Vec::new());
        assert!(run(&txn, index, GeoNearParams::flat("loc", Point::new(0.0, 0.0))).is_empty());
    }
}
