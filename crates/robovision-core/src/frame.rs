//! Owned image frames handed from an acquisition loop to its consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReadError;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit color in display order (blue, green, red)
    Bgr8,
    /// Packed 8-bit color in sensor order (red, green, blue)
    Rgb8,
    /// Single 8-bit channel
    Mono8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Mono8 => 1,
        }
    }
}

/// A decoded image. Immutable once published to a [`crate::Mailbox`]: consumers
/// only ever see it through a shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap a tightly packed buffer. The buffer length must match the geometry.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ReadError> {
        let expected = Self::expected_len(width, height, format);
        if data.len() != expected {
            return Err(ReadError::Protocol(format!(
                "buffer of {} bytes does not match {}x{} {:?} ({} bytes)",
                data.len(),
                width,
                height,
                format,
                expected
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            format,
            captured_at: Utc::now(),
        })
    }

    /// Copy a sensor buffer into an owned frame in display order.
    ///
    /// `Rgb8` input is reordered to `Bgr8`; trailing bytes past the image are
    /// ignored, a short buffer is a protocol error.
    pub fn from_sensor(
        raw: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ReadError> {
        let expected = Self::expected_len(width, height, format);
        if raw.len() < expected {
            return Err(ReadError::Protocol(format!(
                "sensor delivered {} bytes, {}x{} {:?} needs {}",
                raw.len(),
                width,
                height,
                format,
                expected
            )));
        }

        let pixels = &raw[..expected];
        match format {
            PixelFormat::Rgb8 => {
                let mut data = Vec::with_capacity(expected);
                for px in pixels.chunks_exact(3) {
                    data.extend_from_slice(&[px[2], px[1], px[0]]);
                }
                Self::new(data, width, height, PixelFormat::Bgr8)
            }
            PixelFormat::Bgr8 | PixelFormat::Mono8 => {
                Self::new(pixels.to_vec(), width, height, format)
            }
        }
    }

    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_sensor_buffer_is_reordered() -> anyhow::Result<()> {
        let raw = [1u8, 2, 3, 4, 5, 6];
        let frame = Frame::from_sensor(&raw, 2, 1, PixelFormat::Rgb8)?;

        assert_eq!(frame.format, PixelFormat::Bgr8);
        assert_eq!(frame.data(), &[3, 2, 1, 6, 5, 4]);
        Ok(())
    }

    #[test]
    fn test_short_sensor_buffer_is_protocol_error() {
        let raw = [0u8; 5];
        let err = Frame::from_sensor(&raw, 2, 1, PixelFormat::Bgr8).unwrap_err();
        assert!(matches!(err, ReadError::Protocol(_)));
    }

    #[test]
    fn test_padding_after_image_is_dropped() -> anyhow::Result<()> {
        let raw = [7u8; 10];
        let frame = Frame::from_sensor(&raw, 2, 2, PixelFormat::Mono8)?;
        assert_eq!(frame.byte_len(), 4);
        Ok(())
    }
}
