//! Interleaved grid hashes for 2D index keys
//!
//! The square `[min, max)²` is split into `2^bits` columns and rows. A key
//! interleaves the column and row numbers bit by bit, so every cell at a
//! coarser level is one contiguous run of keys.

use super::geometry::{Annulus, Point, Rect};
use crate::storage::{IndexKey, KeyRange};

/// A grid cell at some level of the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeoCell {
    pub level: u32,
    pub col: u64,
    pub row: u64,
}

/// Maps points to interleaved keys and cells back to rectangles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoHashConverter {
    bits: u32,
    min: f64,
    max: f64,
}

impl Default for GeoHashConverter {
    fn default() -> Self {
        Self::new(26, -180.0, 180.0)
    }
}

pub(super) fn interleave(col: u64, row: u64) -> u64 {
    let mut out = 0u64;
    for bit in 0..32 {
        out |= ((col >> bit) & 1) << (2 * bit + 1);
        out |= ((row >> bit) & 1) << (2 * bit);
    }
    out
}

pub(super) fn deinterleave(hash: u64) -> (u64, u64) {
    let (mut col, mut row) = (0u64, 0u64);
    for bit in 0..32 {
        col |= ((hash >> (2 * bit + 1)) & 1) << bit;
        row |= ((hash >> (2 * bit)) & 1) << bit;
    }
    (col, row)
}

impl GeoHashConverter {
    /// `bits` is clamped to `1..=32`
    pub fn new(bits: u32, min: f64, max: f64) -> Self {
        Self {
            bits: bits.clamp(1, 32),
            min,
            max,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Edge length of a cell at `level`
    pub fn cell_edge(&self, level: u32) -> f64 {
        (self.max - self.min) / (1u64 << level) as f64
    }

    /// Diagonal of a finest-level cell
    pub fn error(&self) -> f64 {
        self.cell_edge(self.bits) * std::f64::consts::SQRT_2
    }

    fn grid_index(&self, v: f64, level: u32) -> u64 {
        let cells = 1u64 << level;
        let scaled = (v - self.min) / (self.max - self.min) * cells as f64;
        if scaled <= 0.0 {
            0
        } else {
            (scaled as u64).min(cells - 1)
        }
    }

    /// Cell containing `p` at `level`; points outside the grid clamp to the edge
    pub fn cell_at(&self, p: &Point, level: u32) -> GeoCell {
        GeoCell {
            level,
            col: self.grid_index(p.x, level),
            row: self.grid_index(p.y, level),
        }
    }

    /// Index key for `p`
    pub fn hash(&self, p: &Point) -> u64 {
        let cell = self.cell_at(p, self.bits);
        interleave(cell.col, cell.row)
    }

    /// Rectangle covered by `cell`
    pub fn cell_box(&self, cell: &GeoCell) -> Rect {
        let edge = self.cell_edge(cell.level);
        let x = self.min + cell.col as f64 * edge;
        let y = self.min + cell.row as f64 * edge;
        Rect::new(Point::new(x, y), Point::new(x + edge, y + edge))
    }

    /// Rectangle of the finest cell behind index key `hash`
    pub fn unhash_box(&self, hash: u64) -> Rect {
        let (col, row) = deinterleave(hash);
        self.cell_box(&GeoCell {
            level: self.bits,
            col,
            row,
        })
    }

    /// Inclusive run of index keys inside `cell`
    pub fn cell_range(&self, cell: &GeoCell) -> KeyRange {
        let shift = 2 * (self.bits - cell.level);
        if shift >= 64 {
            return KeyRange::inclusive(IndexKey::GeoHash(0), IndexKey::GeoHash(u64::MAX));
        }
        let start = interleave(cell.col, cell.row) << shift;
        let span = (1u64 << shift) - 1;
        KeyRange::inclusive(IndexKey::GeoHash(start), IndexKey::GeoHash(start | span))
    }

    /// The up to four cells at `level` sharing the grid vertex nearest `p`.
    ///
    /// `level` must be below `bits`.
    pub fn vertex_neighbors(&self, p: &Point, level: u32) -> Vec<GeoCell> {
        let child = self.cell_at(p, level + 1);
        let corner_col = (child.col >> 1) + (child.col & 1);
        let corner_row = (child.row >> 1) + (child.row & 1);
        let cells = 1u64 << level;

        let mut out = Vec::with_capacity(4);
        for col in [corner_col.wrapping_sub(1), corner_col] {
            for row in [corner_row.wrapping_sub(1), corner_row] {
                if col < cells && row < cells {
                    out.push(GeoCell { level, col, row });
                }
            }
        }
        out.sort_by_key(|c| interleave(c.col, c.row));
        out
    }

    /// Cells covering `region`, at the finest level where the bounding box
    /// needs at most `max_cells` cells. Cells disjoint from the ring are
    /// left out.
    pub fn cover(&self, region: &Annulus, max_cells: usize) -> Vec<GeoCell> {
        let bounds = region.bounds();
        let max_cells = max_cells.max(1) as u64;

        let mut level = self.bits;
        let (lo, hi) = loop {
            let lo = self.cell_at(&bounds.min, level);
            let hi = self.cell_at(&bounds.max, level);
            let count = (hi.col - lo.col + 1) * (hi.row - lo.row + 1);
            if count <= max_cells || level == 0 {
                break (lo, hi);
            }
            level -= 1;
        };

        let mut cells = Vec::new();
        for col in lo.col..=hi.col {
            for row in lo.row..=hi.row {
                let cell = GeoCell { level, col, row };
                if !region.is_disjoint(&self.cell_box(&cell)) {
                    cells.push(cell);
                }
            }
        }
        cells.sort_by_key(|c| interleave(c.col, c.row));
        cells
    }

    /// Key ranges for `cells`, merging neighbours that are contiguous in
    /// key order
    pub fn ranges_for(&self, cells: &[GeoCell]) -> Vec<KeyRange> {
        let mut ranges: Vec<KeyRange> = Vec::new();
        for cell in cells {
            let range = self.cell_range(cell);
            if let Some(last) = ranges.last_mut() {
                if let (IndexKey::GeoHash(end), IndexKey::GeoHash(start)) = (&last.end, &range.start) {
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
