//! Proximity search over a spherical index
//!
//! Keys are cube-face cells, so intervals are covered on the sphere
//! itself and no longitude/latitude projection error has to be padded
//! in. Distances are great-circle metres.

use std::sync::Arc;

use super::density::{DensityEstimator, DensityProbe};
use super::geo::{Crs, GeoNearParams};
use super::geometry::{points_from_value, Annulus, Point, MAX_EARTH_DISTANCE_METERS};
use super::interval::{CoveredInterval, NearStats};
use super::sphere_cell::{SphereCellConverter, SphereRing};
use super::stage::NearSearch;
use crate::config::NearConfig;
use crate::executor::{ExecutorError, ExecutorResult};
use crate::observability::{log_event_with_fields, Event};
use crate::stage::{
    FetchStage, IndexScan, IndexScanParams, InvalidationType, KeyFilter, OperationContext,
    StageState, StageType,
};
use crate::storage::{field_at, IndexKey, RecordId, SharedIndex};
use crate::working_set::{ComputedData, WorkingSet, WorkingSetEntry};

fn on_globe(p: &Point) -> bool {
    p.x.abs() <= 180.0 && p.y.abs() <= 90.0
}

/// Interval generator and distance function for a spherical index.
pub struct GeoNear2dSphereSearch {
    params: GeoNearParams,
    index: SharedIndex,
    converter: SphereCellConverter,
    config: NearConfig,
    /// Metres along the surface
    full_bounds: Annulus,
    current_outer: Option<f64>,
    bounds_increment: f64,
    estimator: Option<DensityEstimator<SphereCellConverter>>,
}

impl GeoNear2dSphereSearch {
    /// `params` must use [`Crs::Sphere`]
    pub fn new(
        params: GeoNearParams,
        index: SharedIndex,
        converter: SphereCellConverter,
        config: &NearConfig,
    ) -> ExecutorResult<Self> {
        if params.crs != Crs::Sphere {
            return Err(ExecutorError::bad_geometry(
                "a spherical index only answers great-circle distances",
            ));
        }
        params.validate()?;
        let full_bounds = Annulus::new(
            params.center,
            params.min_distance.min(MAX_EARTH_DISTANCE_METERS),
            params.max_distance.min(MAX_EARTH_DISTANCE_METERS),
        );
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

    pub fn bounds_increment(&self) -> f64 {
        self.bounds_increment
    }

    /// Half the edge of a finest cell
    fn min_bounds_increment(&self) -> f64 {
        self.converter.cell_edge_meters(self.converter.finest_level()) / 2.0
    }

    fn covering_stage(&self, txn: &OperationContext, ring: SphereRing) -> FetchStage {
        let cells = self.converter.cover(&ring, self.config.max_covering_cells);
        let ranges = self.converter.ranges_for(&cells);

        // Keys are checked one by one; a record with keys on both sides of
        // the ring edge is deduplicated by the near stage
        let converter = self.converter;
        let key_filter: KeyFilter = Arc::new(move |key: &IndexKey| match key {
            IndexKey::SphereCell(cell) => converter.key_may_intersect(&ring, *cell),
            _ => false,
        });
        let scan = IndexScan::new(
            txn,
            IndexScanParams::new(self.index.clone(), ranges).with_key_filter(key_filter),
        );
        FetchStage::new(txn, Box::new(scan), self.params.filter.clone())
    }
}

impl NearSearch for GeoNear2dSphereSearch {
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

        // A ring three cell edges wide around a key found at this level
        // holds a few dozen points if the data is even
        self.bounds_increment = 3.0 * estimate;
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
        let is_last = outer == full.outer;
        self.current_outer = Some(outer);

        let ring = SphereRing::from_meters(&full.center, inner, outer);
        let covering = self.covering_stage(txn, ring);
        Ok(Some(CoveredInterval::new(
            Box::new(covering),
            true,
            inner,
            outer,
            is_last,
        )))
    }

    fn compute_distance(&self, entry: &mut WorkingSetEntry) -> ExecutorResult<Option<f64>> {
        let points: Vec<Point> = match entry.document().and_then(|doc| field_at(doc, &self.params.field)) {
            Some(value) => points_from_value(value).into_iter().filter(on_globe).collect(),
            None => Vec::new(),
        };
        let center = self.params.center;
        let nearest = points
            .iter()
            .map(|p| (center.sphere_distance(p), *p))
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match nearest {
            Some((distance, point)) => {
                entry.add_computed(ComputedData::Distance(distance));
                entry.add_computed(ComputedData::NearPoint(point.to_value()));
                Ok(Some(distance))
            }
            None => Err(ExecutorError::bad_geometry(format!(
                "no longitude/latitude location found in field '{}'",
                self.params.field
            ))),
        }
    }

    fn stage_type(&self) -> StageType {
        StageType::GeoNear2dSphere
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

    use crate::executor::ExecutorErrorCode;
    use crate::near::{IntervalStats, NearStage, METERS_PER_DEGREE};
    use crate::query::Predicate;
    use crate::stage::PlanStage;
    use crate::storage::{MemoryIndex, MemoryRecordStore};

    fn setup(points: Vec<serde_json::Value>) -> (OperationContext, SharedIndex) {
        let store = Arc::new(MemoryRecordStore::with_documents(
            points.into_iter().enumerate().map(|(i, p)| json!({ "i": i, "loc": p })),
        ));
        let index = MemoryIndex::geo_2dsphere("loc_2dsphere", "loc", SphereCellConverter::default());
        index.build_from(store.as_ref());
        (OperationContext::new(store, 0), Arc::new(index))
    }

    fn search(index: SharedIndex, params: GeoNearParams, config: &NearConfig) -> GeoNear2dSphereSearch {
        GeoNear2dSphereSearch::new(params, index, SphereCellConverter::default(), config).unwrap()
    }

    fn drain(stage: &mut NearStage<GeoNear2dSphereSearch>) -> Vec<(i64, f64)> {
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

    fn run(txn: &OperationContext, index: SharedIndex, params: GeoNearParams) -> Vec<(i64, f64)> {
        let mut stage = NearStage::new(txn, search(index, params, &NearConfig::default()));
        drain(&mut stage)
    }

    fn order(out: &[(i64, f64)]) -> Vec<i64> {
        out.iter().map(|(i, _)| *i).collect()
    }

    #[test]
    fn test_great_circle_order() {
        // At 60 degrees north a degree of longitude is half a degree of arc
        let (txn, index) = setup(vec![json!([0, 61]), json!([1.5, 60]), json!([0, 58.5])]);
        let out = run(&txn, index, GeoNearParams::sphere("loc", Point::new(0.0, 60.0)));
        assert_eq!(order(&out), vec![1, 0, 2]);
        assert!((out[1].1 - METERS_PER_DEGREE).abs() < 1.0);
    }

    #[test]
    fn test_search_wraps_the_antimeridian() {
        let (txn, index) = setup(vec![json!([179.0, 0]), json!([-179.95, 0]), json!([-178.0, 0])]);
        let out = run(&txn, index, GeoNearParams::sphere("loc", Point::new(179.95, 0.0)));
        assert_eq!(order(&out), vec![1, 0, 2]);
        assert!((out[0].1 - 0.1 * METERS_PER_DEGREE).abs() < 1.0);
    }

    #[test]
    fn test_distance_bounds() {
        let (txn, index) = setup((-5..=5).map(|lon| json!([lon, 0])).collect());
        let params = GeoNearParams::sphere("loc", Point::new(0.0, 0.0))
            .with_min_distance(1.5 * METERS_PER_DEGREE)
            .with_max_distance(3.5 * METERS_PER_DEGREE);
        let out = run(&txn, index, params);
        let mut lons: Vec<i64> = order(&out).into_iter().map(|i| i - 5).collect();
        lons.sort_unstable();
        assert_eq!(lons, vec![-3, -2, 2, 3]);
        assert!(out.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_filter_and_multi_location_documents() {
        let (txn, index) = setup(vec![
            json!([[10, 0], [1, 0]]),
            json!([2, 0]),
            json!([0.5, 0]),
        ]);
        let params = GeoNearParams::sphere("loc", Point::new(0.0, 0.0))
            .with_filter(vec![Predicate::lte("i", json!(1))]);
        let out = run(&txn, index, params);
        assert_eq!(order(&out), vec![0, 1]);
        assert!((out[0].1 - METERS_PER_DEGREE).abs() < 1.0);
    }

    #[test]
    fn test_small_watermarks_find_everything_in_order() {
        let (txn, index) = setup((0..30).map(|lon| json!([lon, 0])).collect());
        let config = NearConfig {
            low_buffer_watermark: 1,
            high_buffer_watermark: 2,
            ..NearConfig::default()
        };
        let params = GeoNearParams::sphere("loc", Point::new(0.0, 0.0));
        let mut stage = NearStage::new(&txn, search(index, params, &config));
        let out = drain(&mut stage);
        assert_eq!(order(&out), (0..30).collect::<Vec<i64>>());

        let stats = stage.stats();
        assert_eq!(stats.stage_type, StageType::GeoNear2dSphere);
        assert_eq!(stats.details["near"]["index_name"], json!("loc_2dsphere"));
        assert!(stats.details["near"]["intervals"].as_array().unwrap().len() > 1);
    }

    #[test]
    fn test_increment_follows_watermarks_with_cell_floor() {
        let (txn, index) = setup(Vec::new());
        let config = NearConfig {
            low_buffer_watermark: 2,
            high_buffer_watermark: 4,
            ..NearConfig::default()
        };
        let mut s = search(index, GeoNearParams::sphere("loc", Point::new(0.0, 0.0)), &config);
        s.bounds_increment = 1_000.0;
        let mut ws = WorkingSet::new();
        let mut stats = NearStats::default();

        let interval = s.next_interval(&txn, &mut ws, &stats).unwrap().unwrap();
        assert_eq!((interval.min_distance, interval.max_distance), (0.0, 1_000.0));

        stats.intervals.push(IntervalStats {
            num_results_buffered: 0,
            ..IntervalStats::default()
        });
        let interval = s.next_interval(&txn, &mut ws, &stats).unwrap().unwrap();
        assert_eq!((interval.min_distance, interval.max_distance), (1_000.0, 3_000.0));

        s.bounds_increment = 1e-6;
        stats.intervals.push(IntervalStats {
            num_results_buffered: 10,
            ..IntervalStats::default()
        });
        s.next_interval(&txn, &mut ws, &stats).unwrap();
        let finest = SphereCellConverter::default().finest_level();
        let floor = SphereCellConverter::default().cell_edge_meters(finest) / 2.0;
        assert_eq!(s.bounds_increment(), floor);
    }

    #[test]
    fn test_rejects_flat_and_off_globe_params() {
        let (_txn, index) = setup(Vec::new());
        let config = NearConfig::default();
        let conv = SphereCellConverter::default();

        let flat = GeoNearParams::flat("loc", Point::new(0.0, 0.0));
        let err = GeoNear2dSphereSearch::new(flat, index.clone(), conv, &config)
            .err()
            .unwrap();
        assert_eq!(err.code(), ExecutorErrorCode::AeroBadGeometry);

        let off_globe = GeoNearParams::sphere("loc", Point::new(200.0, 0.0));
        assert!(GeoNear2dSphereSearch::new(off_globe, index, conv, &config).is_err());
    }

    #[test]
    fn test_empty_index_is_eof() {
        let (txn, index) = setup(Vec::new());
        assert!(run(&txn, index, GeoNearParams::sphere("loc", Point::new(0.0, 0.0))).is_empty());
    }
}
