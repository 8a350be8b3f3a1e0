//! Two-feature alignment geometry.
//!
//! Given the best centers of two located patterns, `c1` and `c2`, the helper
//! point `c3 = (c1.x, c2.y)` closes a right triangle. The signed angle from
//! `c1 -> c2` to `c1 -> c3` is how far the part must turn for the two features
//! to sit on orthogonal axes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn sub(self, other: Point2) -> Point2 {
        Point2::new(self.x - other.x, self.y - other.y)
    }

    pub fn cross(self, other: Point2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn dot(self, other: Point2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Mean of a set of points, `None` when empty.
    pub fn centroid(points: &[Point2]) -> Option<Point2> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point2::new(sx / n, sy / n))
    }

    /// Pixel coordinates, truncated like the drawing primitives expect.
    pub fn to_pixel(self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

/// Auxiliary point sharing `c1`'s column and `c2`'s row.
pub fn alignment_point(c1: Point2, c2: Point2) -> Point2 {
    Point2::new(c1.x, c2.y)
}

/// Signed angle in degrees, in (-180, 180], from `origin -> a` to `origin -> b`.
///
/// `None` when either vector has zero length.
pub fn signed_angle_deg(origin: Point2, a: Point2, b: Point2) -> Option<f64> {
    let v = a.sub(origin);
    let u = b.sub(origin);
    if v.is_zero() || u.is_zero() {
        return None;
    }

    let angle = v.cross(u).atan2(v.dot(u)).to_degrees();
    if angle <= -180.0 { Some(angle + 360.0) } else { Some(angle) }
}

/// Everything the two-pattern stage draws and reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentGeometry {
    pub c1: Point2,
    pub c2: Point2,
    pub c3: Point2,
    /// `None` when the geometry is degenerate
    pub angle_deg: Option<f64>,
}

impl AlignmentGeometry {
    pub fn from_centers(c1: Point2, c2: Point2) -> Self {
        let c3 = alignment_point(c1, c2);
        Self {
            c1,
            c2,
            c3,
            angle_deg: signed_angle_deg(c1, c2, c3),
        }
    }

    /// Segments to draw: the measured `c1 -> c2` and the reference legs.
    pub fn segments(&self) -> [(Point2, Point2); 3] {
        [(self.c1, self.c2), (self.c1, self.c3), (self.c3, self.c2)]
    }

    /// Overlay label, e.g. `angle: 63.4 deg (signed 63.4)`.
    pub fn label(&self) -> String {
        match self.angle_deg {
            Some(angle) => format!("angle: {:.1} deg (signed {:.1})", angle.abs(), angle),
            None => "angle: n/a".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_angle(origin: Point2, a: Point2, b: Point2) -> f64 {
        let v = a.sub(origin);
        let u = b.sub(origin);
        (v.x * u.y - v.y * u.x).atan2(v.x * u.x + v.y * u.y).to_degrees()
    }

    #[test]
    fn test_degenerate_centers_are_unavailable() {
        let geometry =
            AlignmentGeometry::from_centers(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));

        assert_eq!(geometry.c3, Point2::new(0.0, 0.0));
        assert_eq!(geometry.angle_deg, None);
        assert_eq!(geometry.label(), "angle: n/a");
    }

    #[test]
    fn test_angle_from_frame_centers() {
        let c1 = Point2::new(100.0, 100.0);
        let c2 = Point2::new(200.0, 150.0);
        let geometry = AlignmentGeometry::from_centers(c1, c2);

        assert_eq!(geometry.c3, Point2::new(100.0, 150.0));
        let angle = geometry.angle_deg.unwrap();
        assert!((angle - expected_angle(c1, c2, geometry.c3)).abs() < 1e-9);
        assert!(angle > 0.0 && angle < 90.0);
    }

    #[test]
    fn test_angle_is_antisymmetric() {
        let origin = Point2::new(100.0, 100.0);
        let a = Point2::new(200.0, 150.0);
        let b = Point2::new(100.0, 150.0);

        let forward = signed_angle_deg(origin, a, b).unwrap();
        let backward = signed_angle_deg(origin, b, a).unwrap();
        assert!((forward + backward).abs() < 1e-9);
    }

    #[test]
    fn test_opposite_vectors_report_positive_half_turn() {
        let origin = Point2::new(0.0, 0.0);
        let angle =
            signed_angle_deg(origin, Point2::new(1.0, 0.0), Point2::new(-1.0, 0.0)).unwrap();
        assert_eq!(angle, 180.0);
    }

    #[test]
    fn test_random_centers_stay_in_range() {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let c1 = Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0));
            let c2 = Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0));
            let geometry = AlignmentGeometry::from_centers(c1, c2);

            assert_eq!(geometry.c3, Point2::new(c1.x, c2.y));
            if let Some(angle) = geometry.angle_deg {
                assert!(angle > -180.0 && angle <= 180.0);
                // c3 shares a leg with c1, so the turn never exceeds a right angle
                assert!(angle.abs() <= 90.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_centroid() {
        let pts = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 4.0),
            Point2::new(0.0, 4.0),
        ];
        assert_eq!(Point2::centroid(&pts), Some(Point2::new(5.0, 2.0)));
        assert_eq!(Point2::centroid(&[]), None);
    }
}
