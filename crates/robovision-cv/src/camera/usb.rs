//! Generic (USB / V4L2) camera source

use crate::utils::ImageUtils;
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use robovision_core::acquisition::{FrameSource, SourceOpener};
use robovision_core::device::{BackendHint, CameraKind, DeviceDescriptor};
use robovision_core::error::{OpenError, ReadError};
use robovision_core::frame::Frame;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive indices tried, starting at the requested one
pub const SCAN_SPAN: i32 = 4;

/// Capture API for a backend hint
pub fn capture_api(backend: BackendHint) -> i32 {
    match backend {
        BackendHint::V4l2 => videoio::CAP_V4L2,
        _ => videoio::CAP_ANY,
    }
}

/// Indices tried for a requested `index`
pub fn candidate_indices(index: i32, span: i32) -> impl Iterator<Item = i32> {
    index..index.saturating_add(span.max(1))
}

pub struct UsbCameraSource {
    descriptor: DeviceDescriptor,
    capture: Option<VideoCapture>,
    frame: Mat,
}

impl UsbCameraSource {
    /// Open the first working device in `index .. index + span`.
    ///
    /// The returned descriptor carries the index that actually opened.
    pub fn open(descriptor: &DeviceDescriptor, span: i32) -> Result<Self, OpenError> {
        let api = capture_api(descriptor.backend);
        let mut tried = Vec::new();

        for index in candidate_indices(descriptor.index, span) {
            tried.push(index);
            match Self::try_open(index, api) {
                Ok(Some(capture)) => {
                    let mut opened = descriptor.clone();
                    opened.index = index;
                    Self::log_geometry(&capture, &opened);
                    return Ok(Self {
                        descriptor: opened,
                        capture: Some(capture),
                        frame: Mat::default(),
                    });
                }
                Ok(None) => debug!("camera index {index} did not open"),
                Err(e) => debug!("camera index {index} failed: {e}"),
            }
        }

        warn!("no camera found in indices {:?}", tried);
        Err(OpenError::NoDeviceAvailable { tried })
    }

    fn try_open(index: i32, api: i32) -> opencv::Result<Option<VideoCapture>> {
        let mut capture = VideoCapture::new(index, api)?;
        if capture.is_opened()? {
            Ok(Some(capture))
        } else {
            capture.release()?;
            Ok(None)
        }
    }

    fn log_geometry(capture: &VideoCapture, descriptor: &DeviceDescriptor) {
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        info!("opened {descriptor}: {width}x{height} @ {fps:.1} fps");
    }

    pub fn is_open(&self) -> bool {
        self.capture.is_some()
    }
}

impl FrameSource for UsbCameraSource {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    // Video capture blocks until the driver delivers; the timeout is not
    // enforceable here and the loop's poll interval does the pacing.
    fn read_frame(&mut self, _timeout: Duration) -> Result<Frame, ReadError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| ReadError::Transient("camera is closed".to_string()))?;

        match capture.read(&mut self.frame) {
            Ok(true) if !self.frame.empty() => {}
            Ok(_) => return Err(ReadError::Transient("no frame from camera".to_string())),
            Err(e) => return Err(ReadError::Transient(e.to_string())),
        }

        ImageUtils::mat_to_frame(&self.frame).map_err(|e| ReadError::Protocol(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                warn!("failed to release {}: {e}", self.descriptor);
            } else {
                info!("released {}", self.descriptor);
            }
        }
    }
}

impl Drop for UsbCameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens generic cameras; machine-vision descriptors are refused.
#[derive(Debug, Clone, Copy)]
pub struct UsbOpener {
    span: i32,
}

impl UsbOpener {
    pub fn new(span: i32) -> Self {
        Self { span: span.max(1) }
    }
}

impl Default for UsbOpener {
    fn default() -> Self {
        Self::new(SCAN_SPAN)
    }
}

impl SourceOpener for UsbOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn FrameSource>, OpenError> {
        if descriptor.kind != CameraKind::GenericCamera {
            return Err(OpenError::Device(format!("{descriptor} is not a generic camera")));
        }
        Ok(Box::new(UsbCameraSource::open(descriptor, self.span)?))
    }
}
