//! Proximity search
//!
//! Returns documents in non-decreasing distance from a centre point by
//! scanning a sequence of adjacent rings:
//!
//! ```text
//! Initializing -> Buffering -> Advancing -> Buffering -> ... -> Finished
//! ```
//!
//! - `Initializing` probes the index around the centre to size the first
//!   ring
//! - `Buffering` scans one ring and keeps candidates whose exact distance
//!   falls inside it
//! - `Advancing` returns the buffered candidates nearest first
//!
//! Ring widths adapt: a ring that buffered few results doubles the next
//! one, a ring that buffered many halves it.
//!
//! Two index kinds are searched: a 2D grid over a flat square, and a
//! spherical index of cube-face cells over longitude/latitude.

mod density;
mod geo;
mod geohash;
mod geometry;
mod interval;
mod sphere;
mod sphere_cell;
mod stage;

pub use density::{DensityEstimator, DensityProbe, ProbeGrid};
pub use geo::{Crs, GeoNear2dSearch, GeoNearParams};
pub use geohash::{GeoCell, GeoHashConverter};
pub use geometry::{
    points_from_value, x_scan_distance, Annulus, Point, Rect, EARTH_RADIUS_METERS,
    MAX_EARTH_DISTANCE_METERS, METERS_PER_DEGREE,
};
pub use interval::{CoveredInterval, IntervalStats, NearStats};
pub use sphere::GeoNear2dSphereSearch;
pub use sphere_cell::{SphereCell, SphereCellConverter, SphereRing, MAX_SPHERE_CELL_LEVEL};
pub use stage::{NearSearch, NearStage};

/// Proximity search stage over a 2D grid index
pub type GeoNear2dStage = NearStage<GeoNear2dSearch>;

/// Proximity search stage over a spherical index
pub type GeoNear2dSphereStage = NearStage<GeoNear2dSphereSearch>;
