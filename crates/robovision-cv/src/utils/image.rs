//! Conversions between station frames, OpenCV Mats and `image` buffers
//!
//! Buffer <-> Mat copies go through opencv-match, which keeps the buffer's
//! channel order; the RGB/BGR swap is always an explicit `cvt_color`.

use crate::Result;
use anyhow::{Context, bail};
use image::{GrayImage, RgbImage};
use opencv::{
    core::{CV_8UC1, CV_8UC3, Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use opencv_match::prelude::*;
use robovision_core::frame::{Frame, PixelFormat};
use std::path::Path;

/// Image utility functions
pub struct ImageUtils;

impl ImageUtils {
    /// Load an image file as a BGR Mat
    pub fn load_color<P: AsRef<Path>>(path: P) -> Result<Mat> {
        let img = image::open(&path)
            .with_context(|| format!("Failed to open image: {:?}", path.as_ref()))?
            .to_rgb8();

        Self::rgb_to_mat(&img).context("Failed to convert image to OpenCV Mat")
    }

    /// Save a Mat; the format follows the file extension
    pub fn save_image<P: AsRef<Path>>(mat: &Mat, path: P) -> Result<()> {
        let path_str = path.as_ref().to_string_lossy();

        let written = imgcodecs::imwrite(&path_str, mat, &Vector::new())
            .with_context(|| format!("Failed to save image: {}", path_str))?;
        if !written {
            bail!("No encoder accepted {}", path_str);
        }
        Ok(())
    }

    /// RGB buffer to a BGR Mat
    pub fn rgb_to_mat(rgb_image: &RgbImage) -> Result<Mat> {
        let rgb: Mat = rgb_image
            .try_into_cv()
            .context("Failed to convert RGB image to OpenCV Mat")?;
        Self::swap_red_blue(&rgb)
    }

    /// BGR or grayscale Mat to an RGB buffer
    pub fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
        let code = match mat.channels() {
            1 => imgproc::COLOR_GRAY2RGB,
            3 => imgproc::COLOR_BGR2RGB,
            4 => imgproc::COLOR_BGRA2RGB,
            n => bail!("Unsupported channel count {n}"),
        };
        let mut rgb = Mat::default();
        imgproc::cvt_color(mat, &mut rgb, code, 0)?;

        (&rgb)
            .try_into_cv()
            .context("Failed to convert OpenCV Mat to RGB image")
    }

    /// Copy a frame into a Mat in display order
    pub fn frame_to_mat(frame: &Frame) -> Result<Mat> {
        let mat: Mat = match frame.format {
            PixelFormat::Mono8 => (&Self::gray_buffer(frame)?)
                .try_into_cv()
                .context("Failed to convert frame to OpenCV Mat")?,
            // Packed 3-byte pixels; the buffer type only fixes the layout
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => (&Self::packed_buffer(frame)?)
                .try_into_cv()
                .context("Failed to convert frame to OpenCV Mat")?,
        };

        match frame.format {
            PixelFormat::Rgb8 => Self::swap_red_blue(&mat),
            PixelFormat::Bgr8 | PixelFormat::Mono8 => Ok(mat),
        }
    }

    /// Copy an 8-bit BGR or grayscale Mat into a frame
    pub fn mat_to_frame(mat: &Mat) -> Result<Frame> {
        if mat.empty() {
            bail!("Empty image");
        }
        let (data, width, height, format) = match mat.typ() {
            t if t == CV_8UC3 => {
                let packed: RgbImage = mat.try_into_cv().context("Failed to copy BGR Mat")?;
                let (width, height) = packed.dimensions();
                (packed.into_raw(), width, height, PixelFormat::Bgr8)
            }
            t if t == CV_8UC1 => {
                let gray: GrayImage = mat.try_into_cv().context("Failed to copy grayscale Mat")?;
                let (width, height) = gray.dimensions();
                (gray.into_raw(), width, height, PixelFormat::Mono8)
            }
            t => bail!("Unsupported Mat type {t}"),
        };
        Ok(Frame::new(data, width, height, format)?)
    }

    /// Frame to an RGB buffer without going through OpenCV
    pub fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
        let data = match frame.format {
            PixelFormat::Rgb8 => frame.data().to_vec(),
            PixelFormat::Bgr8 => frame
                .data()
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Mono8 => frame.data().iter().flat_map(|&v| [v, v, v]).collect(),
        };
        RgbImage::from_raw(frame.width, frame.height, data)
            .context("Frame size does not match its buffer")
    }

    /// Single-channel view of a BGR, BGRA or grayscale Mat
    pub fn to_gray(mat: &Mat) -> Result<Mat> {
        let code = match mat.channels() {
            1 => return Ok(mat.try_clone()?),
            3 => imgproc::COLOR_BGR2GRAY,
            4 => imgproc::COLOR_BGRA2GRAY,
            n => bail!("Unsupported channel count {n}"),
        };
        let mut gray = Mat::default();
        imgproc::cvt_color(mat, &mut gray, code, 0).context("Failed to convert to grayscale")?;
        Ok(gray)
    }

    fn packed_buffer(frame: &Frame) -> Result<RgbImage> {
        RgbImage::from_raw(frame.width, frame.height, frame.data().to_vec())
            .context("Frame size does not match its buffer")
    }

    fn gray_buffer(frame: &Frame) -> Result<GrayImage> {
        GrayImage::from_raw(frame.width, frame.height, frame.data().to_vec())
            .context("Frame size does not match its buffer")
    }

    fn swap_red_blue(mat: &Mat) -> Result<Mat> {
        let mut swapped = Mat::default();
        imgproc::cvt_color(mat, &mut swapped, imgproc::COLOR_RGB2BGR, 0)?;
        Ok(swapped)
    }
}
