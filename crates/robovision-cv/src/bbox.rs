//! Match results and overlap suppression
//!
//! A [`MatchResult`] is one located instance of a pattern: its score, the
//! rotated outline and the center. Overlap is measured on the axis-aligned
//! [`BBox`] around the outline.

use opencv::core::Point;
use robovision_core::geometry::Point2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest box containing all `points`
    pub fn enclosing(points: &[Point2]) -> Self {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if points.is_empty() {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> Point2 {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &BBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }

    pub fn overlaps(&self, other: &BBox, threshold: f64) -> bool {
        self.iou(other) > threshold
    }
}

/// One located pattern instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Normalized correlation, higher is better
    pub score: f64,
    /// Rotation of the pattern in degrees, counter-clockwise on screen
    pub angle_deg: f64,
    /// Pattern outline, clockwise from the top-left corner of the unrotated pattern
    pub polygon: [Point2; 4],
    pub center: Point2,
}

impl MatchResult {
    /// Outline of a `width` x `height` pattern centered at `center` and
    /// turned by `angle_deg`.
    pub fn rotated(score: f64, center: Point2, width: f64, height: f64, angle_deg: f64) -> Self {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let (hw, hh) = (width / 2.0, height / 2.0);
        // Same convention as imgproc::get_rotation_matrix_2d
        let corner = |dx: f64, dy: f64| {
            Point2::new(center.x + cos * dx + sin * dy, center.y - sin * dx + cos * dy)
        };

        Self {
            score,
            angle_deg,
            polygon: [corner(-hw, -hh), corner(hw, -hh), corner(hw, hh), corner(-hw, hh)],
            center,
        }
    }

    pub fn bbox(&self) -> BBox {
        BBox::enclosing(&self.polygon)
    }

    pub fn pixel_polygon(&self) -> [Point; 4] {
        self.polygon.map(|p| {
            let (x, y) = p.to_pixel();
            Point::new(x, y)
        })
    }
}

/// Matches ranked by descending score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    results: Vec<MatchResult>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(results: Vec<MatchResult>) -> Self {
        let mut set = Self { results };
        set.sort_by_score();
        set
    }

    pub fn push(&mut self, result: MatchResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, other: MatchSet) {
        self.results.extend(other.results);
    }

    pub fn as_slice(&self) -> &[MatchResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn best(&self) -> Option<&MatchResult> {
        self.results.first()
    }

    pub fn centers(&self) -> Vec<Point2> {
        self.results.iter().map(|r| r.center).collect()
    }

    pub fn sort_by_score(&mut self) {
        self.results
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    }

    pub fn filter_by_score(mut self, threshold: f64) -> Self {
        self.results.retain(|r| r.score >= threshold);
        self
    }

    /// Collapse results whose boxes overlap more than `threshold`, keeping
    /// the higher score.
    pub fn apply_nms(mut self, threshold: f64) -> Self {
        if self.results.is_empty() {
            return self;
        }
        self.sort_by_score();

        let boxes: Vec<BBox> = self.results.iter().map(MatchResult::bbox).collect();
        let mut suppressed = vec![false; self.results.len()];
        let mut keep = Vec::new();

        for i in 0..self.results.len() {
            if suppressed[i] {
                continue;
            }
            keep.push(self.results[i].clone());
            for j in (i + 1)..self.results.len() {
                if !suppressed[j] && boxes[i].overlaps(&boxes[j], threshold) {
                    suppressed[j] = true;
                }
            }
        }

        Self { results: keep }
    }

    pub fn truncate(mut self, max_count: usize) -> Self {
        self.results.truncate(max_count);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MatchResult> {
        self.results.iter()
    }
}

impl IntoIterator for MatchSet {
    type Item = MatchResult;
    type IntoIter = std::vec::IntoIter<MatchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl FromIterator<MatchResult> for MatchSet {
    fn from_iter<T: IntoIterator<Item = MatchResult>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, score: f64) -> MatchResult {
        MatchResult::rotated(score, Point2::new(x, y), 10.0, 10.0, 0.0)
    }

    #[test]
    fn test_bbox_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 10.0, 10.0);
        let iou = a.iou(&b);
        assert!((iou - 25.0 / 175.0).abs() < 1e-9);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_nms_keeps_higher_score() {
        let set = MatchSet::from_vec(vec![
            square(10.0, 10.0, 0.8),
            square(11.0, 11.0, 0.9),
            square(50.0, 50.0, 0.7),
        ]);

        let kept = set.apply_nms(0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.best().map(|r| r.score), Some(0.9));
    }

    #[test]
    fn test_rotated_outline() {
        let upright = MatchResult::rotated(1.0, Point2::new(0.0, 0.0), 4.0, 2.0, 0.0);
        assert_eq!(upright.polygon[0], Point2::new(-2.0, -1.0));
        assert_eq!(upright.bbox(), BBox::new(-2.0, -1.0, 4.0, 2.0));

        let turned = MatchResult::rotated(1.0, Point2::new(0.0, 0.0), 4.0, 2.0, 90.0);
        let bbox = turned.bbox();
        assert!((bbox.width - 2.0).abs() < 1e-9);
        assert!((bbox.height - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_and_truncate() {
        let set: MatchSet = (0..5)
            .map(|i| square(i as f64 * 20.0, 0.0, 0.5 + i as f64 * 0.1))
            .collect();
        let kept = set.filter_by_score(0.65).truncate(2);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.score >= 0.65));
        assert!(kept.as_slice()[0].score >= kept.as_slice()[1].score);
    }
}
