//! The slice of the machine-vision camera SDK the station drives.
//!
//! Every call returns the vendor status code as an [`SdkError`] instead of
//! raising, so callers decide per call whether a failure is fatal.

use crate::frame::PixelFormat;
use thiserror::Error;

pub const MV_OK: u32 = 0x0000_0000;
pub const MV_E_HANDLE: u32 = 0x8000_0000;
pub const MV_E_PARAMETER: u32 = 0x8000_0004;
pub const MV_E_NODATA: u32 = 0x8000_0007;
pub const MV_E_ACCESS_DENIED: u32 = 0x8000_0203;

pub const MV_GIGE_DEVICE: u32 = 0x0000_0001;
pub const MV_USB_DEVICE: u32 = 0x0000_0004;
pub const MV_GENTL_GIGE_DEVICE: u32 = 0x0000_0040;

pub const MV_ACCESS_EXCLUSIVE: u32 = 1;

pub const PIXEL_TYPE_MONO8: u32 = 0x0108_0001;
pub const PIXEL_TYPE_RGB8_PACKED: u32 = 0x0218_0014;
pub const PIXEL_TYPE_BGR8_PACKED: u32 = 0x0218_0015;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{call} failed with status {code:#010x}")]
pub struct SdkError {
    pub call: &'static str,
    pub code: u32,
}

impl SdkError {
    pub fn new(call: &'static str, code: u32) -> Self {
        Self { call, code }
    }

    /// The pull timed out without a frame; normal when waiting for a trigger.
    pub fn is_timeout(&self) -> bool {
        self.code == MV_E_NODATA
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

/// Map a vendor status to a result.
pub fn check(call: &'static str, status: i32) -> SdkResult<()> {
    match status as u32 {
        MV_OK => Ok(()),
        code => Err(SdkError::new(call, code)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Gige,
    Usb3,
    Other(u32),
}

impl Transport {
    pub fn from_layer(layer: u32) -> Self {
        match layer {
            MV_GIGE_DEVICE | MV_GENTL_GIGE_DEVICE => Transport::Gige,
            MV_USB_DEVICE => Transport::Usb3,
            other => Transport::Other(other),
        }
    }
}

/// One enumerated device. `raw` is the SDK's own device record, valid until
/// the next enumeration.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub index: usize,
    pub transport: Transport,
    pub raw: usize,
}

/// Opaque SDK handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkHandle(pub usize);

/// A frame buffer lent by the SDK. Must be handed back through
/// [`MvSdk::free_image_buffer`] exactly once; [`super::BufferLease`] does that.
#[derive(Debug)]
pub struct LentBuffer {
    pub width: u32,
    pub height: u32,
    pub pixel_type: u32,
    pub data: *const u8,
    pub len: usize,
    /// SDK-side bookkeeping needed to return the buffer
    pub token: usize,
}

/// Pixel type codes the station can interpret.
pub fn pixel_format_from_type(pixel_type: u32) -> Option<PixelFormat> {
    match pixel_type {
        PIXEL_TYPE_RGB8_PACKED => Some(PixelFormat::Rgb8),
        PIXEL_TYPE_BGR8_PACKED => Some(PixelFormat::Bgr8),
        PIXEL_TYPE_MONO8 => Some(PixelFormat::Mono8),
        _ => None,
    }
}

pub fn pixel_type_code(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgb8 => PIXEL_TYPE_RGB8_PACKED,
        PixelFormat::Bgr8 => PIXEL_TYPE_BGR8_PACKED,
        PixelFormat::Mono8 => PIXEL_TYPE_MONO8,
    }
}

/// Session protocol of the vendor SDK.
pub trait MvSdk: Send + Sync {
    fn initialize(&self) -> SdkResult<()>;
    fn enumerate(&self, layers: u32) -> SdkResult<Vec<DeviceEntry>>;
    fn create_handle(&self, device: &DeviceEntry) -> SdkResult<SdkHandle>;
    fn open_device(&self, handle: &SdkHandle, access: u32) -> SdkResult<()>;
    /// Best packet size for a GigE link, `<= 0` when unknown
    fn optimal_packet_size(&self, handle: &SdkHandle) -> SdkResult<i64>;
    fn set_int(&self, handle: &SdkHandle, key: &str, value: i64) -> SdkResult<()>;
    fn set_float(&self, handle: &SdkHandle, key: &str, value: f32) -> SdkResult<()>;
    fn set_enum(&self, handle: &SdkHandle, key: &str, value: u32) -> SdkResult<()>;
    fn get_int(&self, handle: &SdkHandle, key: &str) -> SdkResult<i64>;
    fn start_grabbing(&self, handle: &SdkHandle) -> SdkResult<()>;
    fn get_image_buffer(&self, handle: &SdkHandle, timeout_ms: u32) -> SdkResult<LentBuffer>;
    fn free_image_buffer(&self, handle: &SdkHandle, buffer: &LentBuffer) -> SdkResult<()>;
    fn stop_grabbing(&self, handle: &SdkHandle) -> SdkResult<()>;
    fn close_device(&self, handle: &SdkHandle) -> SdkResult<()>;
    fn destroy_handle(&self, handle: &SdkHandle) -> SdkResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(check("MV_CC_OpenDevice", 0).is_ok());

        let err = check("MV_CC_GetImageBuffer", MV_E_NODATA as i32).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "MV_CC_GetImageBuffer failed with status 0x80000007");
    }

    #[test]
    fn test_pixel_type_codes_are_symmetric() {
        for format in [PixelFormat::Rgb8, PixelFormat::Bgr8, PixelFormat::Mono8] {
            assert_eq!(pixel_format_from_type(pixel_type_code(format)), Some(format));
        }
        assert_eq!(pixel_format_from_type(0x0110_0003), None);
    }

    #[test]
    fn test_transport_layers() {
        assert_eq!(Transport::from_layer(MV_GIGE_DEVICE), Transport::Gige);
        assert_eq!(Transport::from_layer(MV_GENTL_GIGE_DEVICE), Transport::Gige);
        assert_eq!(Transport::from_layer(MV_USB_DEVICE), Transport::Usb3);
    }
}
