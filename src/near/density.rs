//! Density probe that sizes the first proximity search interval

use super::geohash::GeoHashConverter;
use super::geometry::Point;
use super::sphere_cell::{SphereCellConverter, SphereRing};
use crate::executor::ExecutorError;
use crate::stage::{
    failure, IndexScan, IndexScanParams, InvalidationType, OperationContext, PlanStage, StageState,
};
use crate::storage::{KeyRange, RecordId, SharedIndex};
use crate::working_set::{WorkingSet, WorkingSetId};

/// Result of one probe step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DensityProbe {
    /// Still probing
    NeedTime,
    /// Edge length of the cells at the level where a key was found
    Done(f64),
    /// The probe scan failed; the handle is a status member
    Failure(WorkingSetId),
}

/// A cell hierarchy the probe can walk from fine to coarse.
pub trait ProbeGrid: Copy {
    /// Level the probe starts at
    fn probe_start_level(&self) -> u32;

    /// Key ranges of the cells at `level` around `center`
    fn probe_ranges(&self, center: &Point, level: u32) -> Vec<KeyRange>;

    /// Edge length of a cell at `level`, in the search's distance unit
    fn probe_estimate(&self, level: u32) -> f64;
}

impl ProbeGrid for GeoHashConverter {
    fn probe_start_level(&self) -> u32 {
        self.bits().saturating_sub(1)
    }

    /// The four cells sharing the grid vertex nearest `center`
    fn probe_ranges(&self, center: &Point, level: u32) -> Vec<KeyRange> {
        self.vertex_neighbors(center, level)
            .iter()
            .map(|c| self.cell_range(c))
            .collect()
    }

    fn probe_estimate(&self, level: u32) -> f64 {
        self.cell_edge(level)
    }
}

impl ProbeGrid for SphereCellConverter {
    fn probe_start_level(&self) -> u32 {
        self.finest_level().saturating_sub(1)
    }

    /// The cells within one cell edge of `center`, on any face
    fn probe_ranges(&self, center: &Point, level: u32) -> Vec<KeyRange> {
        let ring = SphereRing::from_meters(center, 0.0, self.cell_edge_meters(level));
        self.ranges_for(&self.cells_at_level(&ring, level))
    }

    /// Metres
    fn probe_estimate(&self, level: u32) -> f64 {
        self.cell_edge_meters(level)
    }
}

/// Scans the cells around the centre, starting one level above the
/// finest and moving to coarser levels until some key turns up.
pub struct DensityEstimator<G: ProbeGrid = GeoHashConverter> {
    index: SharedIndex,
    grid: G,
    center: Point,
    level: u32,
    scan: Option<IndexScan>,
}

impl<G: ProbeGrid> DensityEstimator<G> {
    pub fn new(index: SharedIndex, grid: G, center: Point) -> Self {
        Self {
            index,
            grid,
            center,
            level: grid.probe_start_level(),
            scan: None,
        }
    }

    /// Level currently being probed
    pub fn level(&self) -> u32 {
        self.level
    }

    fn build_scan(&self, txn: &OperationContext) -> IndexScan {
        let ranges = self.grid.probe_ranges(&self.center, self.level);
        IndexScan::new(txn, IndexScanParams::new(self.index.clone(), ranges))
    }

    pub fn work(&mut self, txn: &OperationContext, ws: &mut WorkingSet) -> DensityProbe {
        if self.scan.is_none() {
            self.scan = Some(self.build_scan(txn));
        }
        let scan = match self.scan.as_mut() {
            Some(scan) => scan,
            None => return DensityProbe::NeedTime,
        };

        match scan.work(ws) {
            StageState::IsEof => {
                if self.level > 0 {
                    self.level -= 1;
                    self.scan = None;
                    return DensityProbe::NeedTime;
                }
                DensityProbe::Done(self.grid.probe_estimate(0))
            }
            StageState::Advanced(id) => {
                ws.free(id);
                self.scan = None;
                DensityProbe::Done(self.grid.probe_estimate(self.level))
            }
            StageState::NeedTime => DensityProbe::NeedTime,
            StageState::Failure(id) => DensityProbe::Failure(id),
            other => match failure(
                ws,
                &ExecutorError::invariant_violation(format!(
                    "density probe scan returned {}",
                    other.as_str()
                )),
            ) {
                StageState::Failure(id) => DensityProbe::Failure(id),
                _ => DensityProbe::NeedTime,
            },
        }
    }

    pub fn save_state(&mut self) {
        if let Some(scan) = self.scan.as_mut() {
            scan.save_state();
        }
    }

    pub fn restore_state(&mut self, txn: &OperationContext) {
        if let Some(scan) = self.scan.as_mut() {
            scan.restore_state(txn);
        }
    }

    pub fn invalidate(
        &mut self,
        txn: &OperationContext,
        ws: &mut WorkingSet,
        record_id: RecordId,
        kind: InvalidationType,
    ) {
        if let Some(scan) = self.scan.as_mut() {
            scan.invalidate(txn, ws, record_id, kind);
        }
    }
}
