//! Cube-face cells for spherical index keys
//!
//! Points are projected from the centre of the earth onto the six faces
//! of the enclosing cube. Each face is a quadtree; a key is the face
//! number followed by the interleaved cell position at the finest level,
//! so every coarser cell is one contiguous run of keys. The projection
//! maps straight lines on a face to great circles, so cell edges are
//! great-circle arcs.

use std::f64::consts::FRAC_PI_2;

use super::geohash::{deinterleave, interleave};
use super::geometry::{Point, EARTH_RADIUS_METERS};
use crate::storage::{IndexKey, KeyRange};

/// Deepest level a key can address
pub const MAX_SPHERE_CELL_LEVEL: u32 = 30;

/// A cell on one cube face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SphereCell {
    pub face: u8,
    pub level: u32,
    pub i: u64,
    pub j: u64,
}

impl SphereCell {
    fn children(&self) -> [SphereCell; 4] {
        let (i, j, level) = (self.i << 1, self.j << 1, self.level + 1);
        let child = |di: u64, dj: u64| SphereCell {
            face: self.face,
            level,
            i: i | di,
            j: j | dj,
        };
        [child(0, 0), child(0, 1), child(1, 0), child(1, 1)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct UnitVector([f64; 3]);

impl UnitVector {
    /// `p.x` is longitude and `p.y` latitude, in degrees
    fn from_point(p: &Point) -> Self {
        let (lon, lat) = (p.x.to_radians(), p.y.to_radians());
        UnitVector([lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()])
    }

    fn from_face(face: u8, u: f64, v: f64) -> Self {
        let axis = usize::from(face % 3);
        let sign = if face < 3 { 1.0 } else { -1.0 };
        let mut raw = [0.0; 3];
        raw[axis] = sign;
        raw[(axis + 1) % 3] = u;
        raw[(axis + 2) % 3] = v;
        let norm = (raw[0] * raw[0] + raw[1] * raw[1] + raw[2] * raw[2]).sqrt();
        UnitVector([raw[0] / norm, raw[1] / norm, raw[2] / norm])
    }

    /// Face and face coordinates in `[-1, 1]`
    fn to_face(self) -> (u8, f64, f64) {
        let p = self.0;
        let mut axis = 0;
        for a in 1..3 {
            if p[a].abs() > p[axis].abs() {
                axis = a;
            }
        }
        let major = p[axis].abs();
        let face = axis as u8 + if p[axis] < 0.0 { 3 } else { 0 };
        (face, p[(axis + 1) % 3] / major, p[(axis + 2) % 3] / major)
    }

    /// Central angle in radians
    fn angle(&self, other: &UnitVector) -> f64 {
        let (a, b) = (self.0, other.0);
        let cross = [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ];
        let sin = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
        let cos = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        sin.atan2(cos)
    }
}

/// Cap enclosing a cell
#[derive(Debug, Clone, Copy)]
struct CellBound {
    center: UnitVector,
    radius: f64,
}

/// Ring on the sphere. Radii are central angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereRing {
    center: UnitVector,
    pub inner: f64,
    pub outer: f64,
}

impl SphereRing {
    /// Ring around `center` with radii in metres along the surface
    pub fn from_meters(center: &Point, inner: f64, outer: f64) -> Self {
        Self {
            center: UnitVector::from_point(center),
            inner: inner / EARTH_RADIUS_METERS,
            outer: outer / EARTH_RADIUS_METERS,
        }
    }

    /// Cheap test that the cell bounded by `bound` may share a point with
    /// the ring. Never false for an intersecting cell.
    fn may_intersect(&self, bound: &CellBound) -> bool {
        let d = self.center.angle(&bound.center);
        let slack = 1e-12;
        d - bound.radius <= self.outer + slack && d + bound.radius >= self.inner - slack
    }
}

/// Maps longitude/latitude points to cube-face keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SphereCellConverter {
    finest: u32,
}

impl Default for SphereCellConverter {
    /// Finest cells are about a metre across
    fn default() -> Self {
        Self::new(23)
    }
}

impl SphereCellConverter {
    /// `finest` is clamped to `1..=MAX_SPHERE_CELL_LEVEL`
    pub fn new(finest: u32) -> Self {
        Self {
            finest: finest.clamp(1, MAX_SPHERE_CELL_LEVEL),
        }
    }

    pub fn finest_level(&self) -> u32 {
        self.finest
    }

    /// Average edge of a cell at `level`, in metres
    pub fn cell_edge_meters(&self, level: u32) -> f64 {
        FRAC_PI_2 / (1u64 << level) as f64 * EARTH_RADIUS_METERS
    }

    fn grid_index(coord: f64, level: u32) -> u64 {
        let cells = 1u64 << level;
        let scaled = (coord + 1.0) / 2.0 * cells as f64;
        if scaled <= 0.0 {
            0
        } else {
            (scaled as u64).min(cells - 1)
        }
    }

    /// Cell containing `p` at `level`
    pub fn cell_at(&self, p: &Point, level: u32) -> SphereCell {
        let (face, u, v) = UnitVector::from_point(p).to_face();
        SphereCell {
            face,
            level,
            i: Self::grid_index(u, level),
            j: Self::grid_index(v, level),
        }
    }

    /// Index key for `p`
    pub fn key(&self, p: &Point) -> u64 {
        let cell = self.cell_at(p, self.finest);
        (u64::from(cell.face) << (2 * self.finest)) | interleave(cell.i, cell.j)
    }

    /// Finest cell behind index key `key`
    pub fn cell_for_key(&self, key: u64) -> SphereCell {
        let shift = 2 * self.finest;
        let (i, j) = deinterleave(key & ((1u64 << shift) - 1));
        SphereCell {
            face: (key >> shift) as u8,
            level: self.finest,
            i,
            j,
        }
    }

    /// Inclusive run of index keys inside `cell`
    pub fn cell_range(&self, cell: &SphereCell) -> KeyRange {
        let shift = 2 * (self.finest - cell.level.min(self.finest));
        let face = u64::from(cell.face) << (2 * self.finest);
        let start = face | (interleave(cell.i, cell.j) << shift);
        let span = (1u64 << shift) - 1;
        KeyRange::inclusive(IndexKey::SphereCell(start), IndexKey::SphereCell(start | span))
    }

    fn bound(&self, cell: &SphereCell) -> CellBound {
        let size = 2.0 / (1u64 << cell.level) as f64;
        let (u0, v0) = (cell.i as f64 * size - 1.0, cell.j as f64 * size - 1.0);
        let (u1, v1) = (u0 + size, v0 + size);
        let center = UnitVector::from_face(cell.face, (u0 + u1) / 2.0, (v0 + v1) / 2.0);
        let radius = [(u0, v0), (u0, v1), (u1, v0), (u1, v1)]
            .iter()
            .map(|(u, v)| center.angle(&UnitVector::from_face(cell.face, *u, *v)))
            .fold(0.0, f64::max);
        CellBound { center, radius }
    }

    /// True unless the finest cell behind `key` is known to miss `ring`
    pub fn key_may_intersect(&self, ring: &SphereRing, key: u64) -> bool {
        ring.may_intersect(&self.bound(&self.cell_for_key(key)))
    }

    fn faces(&self, ring: &SphereRing) -> Vec<SphereCell> {
        (0..6)
            .map(|face| SphereCell {
                face,
                level: 0,
                i: 0,
                j: 0,
            })
            .filter(|cell| ring.may_intersect(&self.bound(cell)))
            .collect()
    }

    fn refine(&self, ring: &SphereRing, cells: &[SphereCell]) -> Vec<SphereCell> {
        cells
            .iter()
            .flat_map(SphereCell::children)
            .filter(|cell| ring.may_intersect(&self.bound(cell)))
            .collect()
    }

    fn sorted(&self, mut cells: Vec<SphereCell>) -> Vec<SphereCell> {
        cells.sort_by_key(|c| (c.face, interleave(c.i, c.j)));
        cells
    }

    /// Cells at `level` that may intersect `ring`
    pub fn cells_at_level(&self, ring: &SphereRing, level: u32) -> Vec<SphereCell> {
        let mut cells = self.faces(ring);
        for _ in 0..level.min(self.finest) {
            cells = self.refine(ring, &cells);
        }
        self.sorted(cells)
    }

    /// Cells covering `ring` at the finest level that needs at most
    /// `max_cells` cells. The six faces are used if even they exceed it.
    pub fn cover(&self, ring: &SphereRing, max_cells: usize) -> Vec<SphereCell> {
        let mut cells = self.faces(ring);
        for _ in 0..self.finest {
            let finer = self.refine(ring, &cells);
            if finer.len() > max_cells.max(1) {
                break;
            }
            cells = finer;
        }
        self.sorted(cells)
    }

    /// Key ranges for sorted `cells`, merging runs that are contiguous
    pub fn ranges_for(&self, cells: &[SphereCell]) -> Vec<KeyRange> {
        let mut ranges: Vec<KeyRange> = Vec::new();
        for cell in cells {
            let range = self.cell_range(cell);
            if let Some(last) = ranges.last_mut() {
                if let (IndexKey::SphereCell(end), IndexKey::SphereCell(start)) =
                    (&last.end, &range.start)
                {
                    if end.checked_add(1) == Some(*start) {
                        last.end = range.end;
                        continue;
                    }
                }
            }
            ranges.push(range);
        }
        ranges
    }
}
