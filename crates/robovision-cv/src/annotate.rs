//! Drawing alignment results onto an image

use crate::Result;
use crate::alignment::AlignmentReport;
use crate::bbox::MatchResult;
use opencv::{
    core::{Mat, Point, Scalar, Vector},
    imgproc,
    prelude::*,
};
use robovision_core::geometry::{AlignmentGeometry, Point2};

// BGR
const RED: (f64, f64, f64) = (0.0, 0.0, 255.0);
const GREEN: (f64, f64, f64) = (0.0, 255.0, 0.0);
const BLUE: (f64, f64, f64) = (255.0, 0.0, 0.0);
const YELLOW: (f64, f64, f64) = (0.0, 255.0, 255.0);
const WHITE: (f64, f64, f64) = (255.0, 255.0, 255.0);

const POINT_RADIUS: i32 = 3;
const LABEL_OFFSET: (i32, i32) = (8, -10);

fn color((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn pixel(p: Point2) -> Point {
    let (x, y) = p.to_pixel();
    Point::new(x, y)
}

/// Copy of `image` (converted to BGR) with the report drawn on it.
pub fn annotate(image: &Mat, report: &AlignmentReport) -> Result<Mat> {
    let mut canvas = Mat::default();
    if image.channels() == 1 {
        imgproc::cvt_color(image, &mut canvas, imgproc::COLOR_GRAY2BGR, 0)?;
    } else {
        image.copy_to(&mut canvas)?;
    }

    for result in report.primary.matches.iter() {
        draw_outline(&mut canvas, result, GREEN)?;
    }
    for result in report.secondary.matches.iter() {
        draw_outline(&mut canvas, result, BLUE)?;
    }
    if let Some(geometry) = &report.geometry {
        draw_geometry(&mut canvas, geometry)?;
    }
    Ok(canvas)
}

/// Rotated outline of one match
pub fn draw_outline(canvas: &mut Mat, result: &MatchResult, bgr: (f64, f64, f64)) -> Result<()> {
    let mut contour = Vector::<Vector<Point>>::new();
    contour.push(Vector::from_slice(&result.pixel_polygon()));
    imgproc::polylines(canvas, &contour, true, color(bgr), 1, imgproc::LINE_AA, 0)?;
    Ok(())
}

/// The c1 -> c2 segment, both centers, and when the angle exists the helper
/// point with its legs and the angle label.
pub fn draw_geometry(canvas: &mut Mat, geometry: &AlignmentGeometry) -> Result<()> {
    let (c1, c2, c3) = (pixel(geometry.c1), pixel(geometry.c2), pixel(geometry.c3));

    line(canvas, c1, c2, RED)?;
    dot(canvas, c1, GREEN)?;
    dot(canvas, c2, BLUE)?;

    let origin = Point::new(c1.x + LABEL_OFFSET.0, c1.y + LABEL_OFFSET.1);
    imgproc::put_text(
        canvas,
        &geometry.label(),
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color(WHITE),
        1,
        imgproc::LINE_AA,
        false,
    )?;

    dot(canvas, c3, YELLOW)?;
    line(canvas, c3, c1, RED)?;
    line(canvas, c3, c2, RED)?;
    Ok(())
}

fn line(canvas: &mut Mat, from: Point, to: Point, bgr: (f64, f64, f64)) -> Result<()> {
    imgproc::line(canvas, from, to, color(bgr), 1, imgproc::LINE_AA, 0)?;
    Ok(())
}

fn dot(canvas: &mut Mat, at: Point, bgr: (f64, f64, f64)) -> Result<()> {
    imgproc::circle(canvas, at, POINT_RADIUS, color(bgr), -1, imgproc::LINE_AA, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::MatchSet;
    use crate::matching::MatchOutcome;
    use crate::utils::ImageUtils;
    use opencv::core::{self, CV_8UC1, CV_8UC3};

    fn outcome(center: Point2) -> MatchOutcome {
        let found = MatchResult::rotated(0.9, center, 20.0, 10.0, 0.0);
        let set: MatchSet = std::iter::once(found).collect();
        MatchOutcome::from_matches(set)
    }

    fn pixels_of(image: &Mat, bgr: [u8; 3]) -> Result<usize> {
        Ok(image.data_bytes()?.chunks_exact(3).filter(|px| *px == bgr).count())
    }

    fn lit_pixels(image: &Mat) -> Result<i32> {
        Ok(core::count_non_zero(&ImageUtils::to_gray(image)?)?)
    }

    #[test]
    fn test_annotation_draws_points() -> Result<()> {
        let image = Mat::new_rows_cols_with_default(100, 120, CV_8UC1, Scalar::all(0.0))?;
        let report = AlignmentReport::from_outcomes(
            outcome(Point2::new(30.0, 30.0)),
            outcome(Point2::new(80.0, 70.0)),
        );

        let annotated = annotate(&image, &report)?;
        assert_eq!(annotated.typ(), CV_8UC3);
        assert_eq!(annotated.size()?, image.size()?);

        assert!(pixels_of(&annotated, [0, 255, 255])? > 0, "c3 missing");
        assert!(pixels_of(&annotated, [0, 255, 0])? > 0, "c1 missing");
        assert!(pixels_of(&annotated, [255, 0, 0])? > 0, "c2 missing");
        assert!(pixels_of(&annotated, [0, 0, 255])? > 0, "segments missing");
        Ok(())
    }

    #[test]
    fn test_source_is_untouched() -> Result<()> {
        let image = Mat::new_rows_cols_with_default(50, 50, CV_8UC3, Scalar::all(0.0))?;
        let report = AlignmentReport::from_outcomes(
            outcome(Point2::new(10.0, 10.0)),
            MatchOutcome::default(),
        );

        let annotated = annotate(&image, &report)?;
        assert!(report.geometry.is_none());
        assert_eq!(lit_pixels(&image)?, 0);
        assert!(lit_pixels(&annotated)? > 0);
        assert_eq!(pixels_of(&annotated, [0, 255, 255])?, 0);
        Ok(())
    }
}
