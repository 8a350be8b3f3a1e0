//! Pre-rotated copies of a pattern.

use crate::Result;
use anyhow::Context;
use opencv::{
    core::{self, Mat, Point2f, Scalar, Size},
    imgproc,
    prelude::*,
};

/// A pattern turned by `angle_deg` inside a canvas large enough to hold it.
/// The area outside the pattern is filled with the pattern's mean intensity
/// so it neither helps nor hurts the correlation much.
#[derive(Debug, Clone)]
pub struct RotatedTemplate {
    pub angle_deg: f64,
    pub image: Mat,
}

/// Angles from `-tolerance` to `+tolerance` in `step` increments, always including 0.
pub fn angle_steps(tolerance_deg: f64, step_deg: f64) -> Vec<f64> {
    let tolerance = tolerance_deg.abs();
    if tolerance < f64::EPSILON || step_deg <= 0.0 {
        return vec![0.0];
    }

    let steps = (tolerance / step_deg).floor() as i32;
    let mut angles: Vec<f64> = (-steps..=steps).map(|i| i as f64 * step_deg).collect();
    // Cover the exact bounds when the step does not divide the tolerance
    if (steps as f64 * step_deg - tolerance).abs() > 1e-9 {
        angles.insert(0, -tolerance);
        angles.push(tolerance);
    }
    angles
}

/// Canvas that contains a `width` x `height` image rotated by `angle_deg`.
pub fn rotated_canvas(width: i32, height: i32, angle_deg: f64) -> Size {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let (w, h) = (width as f64, height as f64);
    // Trim float noise so 90 degrees does not round up a pixel
    let canvas_w = (w * cos.abs() + h * sin.abs() - 1e-6).ceil() as i32;
    let canvas_h = (w * sin.abs() + h * cos.abs() - 1e-6).ceil() as i32;
    Size::new(canvas_w.max(1), canvas_h.max(1))
}

/// Rotate a single-channel pattern by `angle_deg` (counter-clockwise on screen).
pub fn rotate(pattern: &Mat, angle_deg: f64) -> Result<RotatedTemplate> {
    if angle_deg.abs() < f64::EPSILON {
        return Ok(RotatedTemplate {
            angle_deg: 0.0,
            image: pattern.try_clone()?,
        });
    }

    let size = pattern.size()?;
    let canvas = rotated_canvas(size.width, size.height, angle_deg);
    let center = Point2f::new(size.width as f32 / 2.0, size.height as f32 / 2.0);

    let mut transform = imgproc::get_rotation_matrix_2d(center, angle_deg, 1.0)
        .context("Failed to build rotation matrix")?;
    // Shift so the pattern center lands on the canvas center
    *transform.at_2d_mut::<f64>(0, 2)? += (canvas.width - size.width) as f64 / 2.0;
    *transform.at_2d_mut::<f64>(1, 2)? += (canvas.height - size.height) as f64 / 2.0;

    let fill = core::mean(pattern, &core::no_array())?;
    let mut rotated = Mat::default();
    imgproc::warp_affine(
        pattern,
        &mut rotated,
        &transform,
        canvas,
        imgproc::INTER_LINEAR,
        core::BORDER_CONSTANT,
        Scalar::all(fill[0]),
    )
    .with_context(|| format!("Failed to rotate pattern by {angle_deg} deg"))?;

    Ok(RotatedTemplate {
        angle_deg,
        image: rotated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC1;

    #[test]
    fn test_angle_steps() {
        assert_eq!(angle_steps(0.0, 1.0), vec![0.0]);
        assert_eq!(angle_steps(1.0, 1.0), vec![-1.0, 0.0, 1.0]);
        assert_eq!(angle_steps(5.0, 1.0).len(), 11);

        let uneven = angle_steps(2.5, 1.0);
        assert_eq!(uneven.first(), Some(&-2.5));
        assert_eq!(uneven.last(), Some(&2.5));
        assert!(uneven.contains(&0.0));
    }

    #[test]
    fn test_canvas_grows_with_rotation() {
        assert_eq!(rotated_canvas(40, 20, 0.0), Size::new(40, 20));
        assert_eq!(rotated_canvas(40, 20, 90.0), Size::new(20, 40));
        let diagonal = rotated_canvas(40, 20, 45.0);
        assert!(diagonal.width > 40 && diagonal.height > 20);
    }

    #[test]
    fn test_rotate_keeps_type() -> Result<()> {
        let pattern = Mat::new_rows_cols_with_default(20, 40, CV_8UC1, Scalar::all(100.0))?;
        let rotated = rotate(&pattern, 5.0)?;
        assert_eq!(rotated.image.typ(), CV_8UC1);
        assert_eq!(rotated.image.size()?, rotated_canvas(40, 20, 5.0));
        Ok(())
    }
}
