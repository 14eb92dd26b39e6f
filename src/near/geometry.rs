//! Planar and spherical geometry for proximity search

use serde::Serialize;
use serde_json::{json, Value};

/// Mean equatorial radius used for spherical distances
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Half the circumference of the earth; no spherical distance exceeds it
pub const MAX_EARTH_DISTANCE_METERS: f64 = std::f64::consts::PI * EARTH_RADIUS_METERS;

/// Length of one degree of longitude at the equator
pub const METERS_PER_DEGREE: f64 = 2.0 * MAX_EARTH_DISTANCE_METERS / 360.0;

/// A 2D location. For spherical searches `x` is longitude and `y`
/// latitude, both in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Euclidean distance
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Great-circle distance in metres
    pub fn sphere_distance(&self, other: &Point) -> f64 {
        let (lat1, lat2) = (self.y.to_radians(), other.y.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.x - self.x).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }

    pub fn to_value(&self) -> Value {
        json!([self.x, self.y])
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Distance from `p` to the closest point of the rectangle
    pub fn min_distance(&self, p: &Point) -> f64 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        dx.hypot(dy)
    }

    /// Distance from `p` to the farthest corner of the rectangle
    pub fn max_distance(&self, p: &Point) -> f64 {
        let dx = (p.x - self.min.x).abs().max((self.max.x - p.x).abs());
        let dy = (p.y - self.min.y).abs().max((self.max.y - p.y).abs());
        dx.hypot(dy)
    }
}

/// Ring between two circles around `center`, both edges inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Annulus {
    pub center: Point,
    pub inner: f64,
    pub outer: f64,
}

impl Annulus {
    pub fn new(center: Point, inner: f64, outer: f64) -> Self {
        Self {
            center,
            inner,
            outer,
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        let d = self.center.distance(p);
        d >= self.inner && d <= self.outer
    }

    /// Bounding box of the outer circle
    pub fn bounds(&self) -> Rect {
        Rect::new(
            Point::new(self.center.x - self.outer, self.center.y - self.outer),
            Point::new(self.center.x + self.outer, self.center.y + self.outer),
        )
    }

    /// Cheap test that `rect` shares no point with the ring.
    ///
    /// May answer false for some disjoint rectangles, never true for an
    /// intersecting one.
    pub fn is_disjoint(&self, rect: &Rect) -> bool {
        rect.min_distance(&self.center) > self.outer || rect.max_distance(&self.center) < self.inner
    }
}

/// Longitude span needed to cover `max_distance_degrees` at latitude `y`
pub fn x_scan_distance(y: f64, max_distance_degrees: f64) -> f64 {
    let north = (y + max_distance_degrees).min(89.0).to_radians().cos();
    let south = (y - max_distance_degrees).max(-89.0).to_radians().cos();
    max_distance_degrees / north.min(south)
}

fn point_from_value(value: &Value) -> Option<Point> {
    let (x, y) = match value {
        Value::Array(items) if items.len() == 2 => (items[0].as_f64()?, items[1].as_f64()?),
        Value::Object(fields) => (fields.get("x")?.as_f64()?, fields.get("y")?.as_f64()?),
        _ => return None,
    };
    let point = Point::new(x, y);
    point.is_finite().then_some(point)
}

/// Parses the locations stored in a field.
///
/// A location is `[x, y]` or `{"x": .., "y": ..}`. An array of locations
/// yields each one; anything unparseable is skipped.
pub fn points_from_value(value: &Value) -> Vec<Point> {
    if let Some(point) = point_from_value(value) {
        return vec![point];
    }
    match value {
        Value::Array(items) => items.iter().filter_map(point_from_value).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        assert_eq!(points_from_value(&json!([1, 2])), vec![Point::new(1.0, 2.0)]);
        assert_eq!(points_from_value(&json!({"x": 1.5, "y": -2})), vec![Point::new(1.5, -2.0)]);
        assert_eq!(
            points_from_value(&json!([[0, 0], [3, 4], "bad"])),
            vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)]
        );
        assert!(points_from_value(&json!("nowhere")).is_empty());
        assert!(points_from_value(&json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn test_sphere_distance() {
        let origin = Point::new(0.0, 0.0);
        let one_degree = origin.sphere_distance(&Point::new(1.0, 0.0));
        assert!((one_degree - METERS_PER_DEGREE).abs() < 1.0);

        let antipode = origin.sphere_distance(&Point::new(180.0, 0.0));
        assert!((antipode - MAX_EARTH_DISTANCE_METERS).abs() < 1.0);
    }

    #[test]
    fn test_annulus_disjoint() {
        let ring = Annulus::new(Point::new(0.0, 0.0), 2.0, 4.0);
        let inside_hole = Rect::new(Point::new(-0.5, -0.5), Point::new(0.5, 0.5));
        let outside = Rect::new(Point::new(5.0, 5.0), Point::new(6.0, 6.0));
        let crossing = Rect::new(Point::new(1.0, -1.0), Point::new(3.0, 1.0));

        assert!(ring.is_disjoint(&inside_hole));
        assert!(ring.is_disjoint(&outside));
        assert!(!ring.is_disjoint(&crossing));
        assert!(ring.contains(&Point::new(3.0, 0.0)));
        assert!(!ring.contains(&Point::new(1.0, 0.0)));
    }

    #[test]
    fn test_x_scan_distance_grows_with_latitude() {
        assert!((x_scan_distance(0.0, 1.0) - 1.0).abs() < 1e-3);
        assert!(x_scan_distance(60.0, 1.0) > 1.9);
    }
}
