//! Rotation-tolerant template matcher
//!
//! The pattern is pre-rotated over the allowed angle range; every rotation is
//! correlated against the grayscale frame (normalized correlation
//! coefficient), the strongest peaks of each response are collected, and the
//! combined candidates go through overlap suppression, the score threshold
//! and the result limit.

use super::rotation::{RotatedTemplate, angle_steps, rotate};
use super::MatchOutcome;
use crate::bbox::{MatchResult, MatchSet};
use crate::traits::MatchEngine;
use crate::utils::ImageUtils;
use crate::Result;
use anyhow::{Context, bail};
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size},
    imgproc,
    prelude::*,
};
use robovision_core::config::MatchParams;
use robovision_core::geometry::Point2;
use std::path::Path;
use tracing::debug;

/// Spacing of the pre-rotated patterns
pub const ANGLE_STEP_DEG: f64 = 1.0;

/// Peaks taken from each response map per requested result
const PEAKS_PER_RESULT: usize = 4;

/// Value written over a consumed peak; below any real coefficient
const SUPPRESSED: f64 = -2.0;

pub struct Matcher {
    params: MatchParams,
    pattern_size: Size,
    templates: Vec<RotatedTemplate>,
}

impl Matcher {
    /// Prepare a matcher for `pattern` (BGR, BGRA or grayscale).
    pub fn new(pattern: &Mat, params: MatchParams) -> Result<Self> {
        if pattern.empty() {
            bail!("Pattern image is empty");
        }
        let gray = ImageUtils::to_gray(pattern)?;
        let pattern_size = gray.size()?;

        let templates = angle_steps(params.angle_tolerance_deg, ANGLE_STEP_DEG)
            .into_iter()
            .map(|angle| rotate(&gray, angle))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "matcher ready: {}x{} pattern, {} rotations, max {} results >= {:.2}",
            pattern_size.width,
            pattern_size.height,
            templates.len(),
            params.max_count,
            params.score_threshold
        );

        Ok(Self {
            params,
            pattern_size,
            templates,
        })
    }

    /// Load the pattern from an image file.
    pub fn from_file<P: AsRef<Path>>(path: P, params: MatchParams) -> Result<Self> {
        let pattern = ImageUtils::load_color(&path)?;
        Self::new(&pattern, params).with_context(|| format!("Invalid pattern {:?}", path.as_ref()))
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn pattern_size(&self) -> Size {
        self.pattern_size
    }

    pub fn rotations(&self) -> usize {
        self.templates.len()
    }

    /// Locate the pattern in `image`.
    ///
    /// Never returns more than `max_count` results, and every returned score
    /// is at least `score_threshold`.
    pub fn match_image(&self, image: &Mat) -> Result<MatchOutcome> {
        if self.params.max_count == 0 {
            return Ok(MatchOutcome::default());
        }
        let gray = ImageUtils::to_gray(image)?;
        let image_size = gray.size()?;

        let mut candidates = MatchSet::new();
        for template in &self.templates {
            let size = template.image.size()?;
            if size.width > image_size.width || size.height > image_size.height {
                continue;
            }
            candidates.extend(self.peaks(&gray, template)?);
        }

        let matches = candidates
            .filter_by_score(self.params.score_threshold)
            .apply_nms(self.params.iou_threshold)
            .truncate(self.params.max_count);

        Ok(MatchOutcome::from_matches(matches))
    }

    /// Strongest peaks of one rotation's response map.
    fn peaks(&self, image: &Mat, template: &RotatedTemplate) -> Result<MatchSet> {
        let mut response = Mat::default();
        imgproc::match_template(
            image,
            &template.image,
            &mut response,
            imgproc::TM_CCOEFF_NORMED,
            &core::no_array(),
        )
        .context("Template matching failed")?;

        let canvas = template.image.size()?;
        let radius_x = (self.pattern_size.width / 2).max(1);
        let radius_y = (self.pattern_size.height / 2).max(1);
        let limit = self.params.max_count.saturating_mul(PEAKS_PER_RESULT);

        let mut found = MatchSet::new();
        for _ in 0..limit {
            let mut score = 0.0;
            let mut at = Point::default();
            core::min_max_loc(
                &response,
                None,
                Some(&mut score),
                None,
                Some(&mut at),
                &core::no_array(),
            )?;
            if !score.is_finite() || score < self.params.score_threshold {
                break;
            }

            let center = Point2::new(
                at.x as f64 + canvas.width as f64 / 2.0,
                at.y as f64 + canvas.height as f64 / 2.0,
            );
            found.push(MatchResult::rotated(
                score,
                center,
                self.pattern_size.width as f64,
                self.pattern_size.height as f64,
                template.angle_deg,
            ));

            // Blank the neighbourhood so the next peak is a different location
            let x0 = (at.x - radius_x).max(0);
            let y0 = (at.y - radius_y).max(0);
            let x1 = (at.x + radius_x + 1).min(response.cols());
            let y1 = (at.y + radius_y + 1).min(response.rows());
            let mut region = Mat::roi_mut(&mut response, Rect::new(x0, y0, x1 - x0, y1 - y0))?;
            region.set_to(&Scalar::all(SUPPRESSED), &core::no_array())?;
        }

        Ok(found)
    }
}

impl MatchEngine for Matcher {
    fn match_image(&self, image: &Mat) -> Result<MatchOutcome> {
        Matcher::match_image(self, image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC1, Point2f};

    const PART: Size = Size { width: 40, height: 30 };

    /// Textured background so correlation has something to work with
    fn background(rows: i32, cols: i32) -> Result<Mat> {
        let mut image = Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(0.0))?;
        let width = cols as usize;
        for (i, px) in image.data_bytes_mut()?.iter_mut().enumerate() {
            let (x, y) = (i % width, i / width);
            *px = (64 + (x * 7 + y * 13) % 64) as u8;
        }
        Ok(image)
    }

    fn draw_part(image: &mut Mat, origin: Point) -> Result<()> {
        let body = Rect::new(origin.x, origin.y, PART.width, PART.height);
        imgproc::rectangle(image, body, Scalar::all(230.0), -1, imgproc::LINE_8, 0)?;
        let hole = Point::new(origin.x + 12, origin.y + 15);
        imgproc::circle(image, hole, 7, Scalar::all(20.0), -1, imgproc::LINE_8, 0)?;
        imgproc::rectangle(
            image,
            Rect::new(origin.x + 24, origin.y + 5, 10, 6),
            Scalar::all(90.0),
            -1,
            imgproc::LINE_8,
            0,
        )?;
        Ok(())
    }

    fn scene(origins: &[Point]) -> Result<(Mat, Mat)> {
        let mut image = background(240, 320)?;
        for &origin in origins {
            draw_part(&mut image, origin)?;
        }
        let first = origins[0];
        let crop = Rect::new(first.x, first.y, PART.width, PART.height);
        let pattern = Mat::roi(&image, crop)?.try_clone()?;
        Ok((image, pattern))
    }

    fn params(max_count: usize, score_threshold: f64, angle_tolerance_deg: f64) -> MatchParams {
        MatchParams {
            max_count,
            score_threshold,
            iou_threshold: 0.3,
            angle_tolerance_deg,
        }
    }

    #[test]
    fn test_locates_single_part() -> Result<()> {
        let (image, pattern) = scene(&[Point::new(60, 80)])?;
        let matcher = Matcher::new(&pattern, MatchParams::default())?;

        let outcome = matcher.match_image(&image)?;
        assert_eq!(outcome.count, 1);
        let best = outcome.matches.best().context("no match")?;
        assert!(best.score > 0.95);
        let center = outcome.best_center().context("no center")?;
        assert!((center.x - 80.0).abs() <= 1.5, "x = {}", center.x);
        assert!((center.y - 95.0).abs() <= 1.5, "y = {}", center.y);
        Ok(())
    }

    #[test]
    fn test_never_exceeds_max_count_and_threshold() -> Result<()> {
        let origins = [Point::new(20, 20), Point::new(150, 40), Point::new(90, 170)];
        let (image, pattern) = scene(&origins)?;

        for max_count in [1, 2, 5] {
            let matcher = Matcher::new(&pattern, params(max_count, 0.9, 0.0))?;
            let outcome = matcher.match_image(&image)?;
            assert!(outcome.count <= max_count);
            assert_eq!(outcome.count, max_count.min(origins.len()));
            assert!(outcome.matches.iter().all(|m| m.score >= 0.9));
            assert_eq!(outcome.centers.len(), outcome.count);
        }
        Ok(())
    }

    #[test]
    fn test_no_match_below_threshold() -> Result<()> {
        let (_, pattern) = scene(&[Point::new(60, 80)])?;
        let empty_scene = background(240, 320)?;
        let matcher = Matcher::new(&pattern, params(3, 0.8, 0.0))?;

        let outcome = matcher.match_image(&empty_scene)?;
        assert!(outcome.matches.iter().all(|m| m.score >= 0.8));
        assert!(outcome.count <= 3);
        Ok(())
    }

    #[test]
    fn test_rotated_part_within_tolerance() -> Result<()> {
        let (image, pattern) = scene(&[Point::new(140, 100)])?;

        let center = Point2f::new(160.0, 115.0);
        let transform = imgproc::get_rotation_matrix_2d(center, 3.0, 1.0)?;
        let mut rotated = Mat::default();
        imgproc::warp_affine(
            &image,
            &mut rotated,
            &transform,
            image.size()?,
            imgproc::INTER_LINEAR,
            core::BORDER_REFLECT,
            Scalar::default(),
        )?;

        let matcher = Matcher::new(&pattern, params(1, 0.6, 5.0))?;
        assert_eq!(matcher.rotations(), 11);
        let outcome = matcher.match_image(&rotated)?;
        let best = outcome.matches.best().context("rotated part not found")?;
        assert!((best.angle_deg - 3.0).abs() <= 1.0, "angle = {}", best.angle_deg);
        assert!((best.center.x - 160.0).abs() <= 2.0);
        assert!((best.center.y - 115.0).abs() <= 2.0);
        Ok(())
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        assert!(Matcher::new(&Mat::default(), MatchParams::default()).is_err());
    }
}
