//! Machine-vision camera source.
//!
//! Session order: initialize the SDK, enumerate, open an exclusive handle,
//! tune the GigE packet size, configure trigger / exposure / pixel format,
//! check the payload size, start streaming. Teardown runs in the reverse
//! order (stop streaming, close, destroy) on every exit path and never fails.

pub mod ffi;
pub mod sdk;

use super::{FrameSource, SourceOpener};
use crate::config::{MachineVisionConfig, TriggerModeConfig};
use crate::device::{BackendHint, DeviceDescriptor};
use crate::error::{OpenError, ReadError};
use crate::frame::{Frame, PixelFormat};
use sdk::{
    DeviceEntry, LentBuffer, MV_ACCESS_EXCLUSIVE, MV_GIGE_DEVICE, MV_USB_DEVICE, MvSdk, SdkError,
    SdkHandle, Transport, pixel_format_from_type, pixel_type_code,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use ffi::MvsLibrary;

/// Acquisition settings applied while opening the device
#[derive(Debug, Clone)]
pub struct MvSettings {
    pub exposure_us: i64,
    pub trigger: TriggerModeConfig,
    pub pixel_format: PixelFormat,
}

impl From<&MachineVisionConfig> for MvSettings {
    fn from(config: &MachineVisionConfig) -> Self {
        Self {
            exposure_us: config.exposure_us,
            trigger: config.trigger,
            pixel_format: config.pixel_format,
        }
    }
}

/// Returns a lent buffer to the SDK when dropped, whatever happened to the
/// copy in between.
pub struct BufferLease<'a> {
    sdk: &'a dyn MvSdk,
    handle: &'a SdkHandle,
    buffer: LentBuffer,
}

impl<'a> BufferLease<'a> {
    pub fn new(sdk: &'a dyn MvSdk, handle: &'a SdkHandle, buffer: LentBuffer) -> Self {
        Self { sdk, handle, buffer }
    }

    pub fn info(&self) -> &LentBuffer {
        &self.buffer
    }

    pub fn bytes(&self) -> &[u8] {
        if self.buffer.data.is_null() || self.buffer.len == 0 {
            return &[];
        }
        // SAFETY: the SDK guarantees `len` readable bytes at `data` until the
        // buffer is freed, which only happens when this lease is dropped.
        unsafe { std::slice::from_raw_parts(self.buffer.data, self.buffer.len) }
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sdk.free_image_buffer(self.handle, &self.buffer) {
            warn!("failed to return image buffer: {e}");
        }
    }
}

/// Tracks which session steps succeeded so teardown undoes exactly those.
struct Session {
    sdk: Arc<dyn MvSdk>,
    handle: Option<SdkHandle>,
    opened: bool,
    grabbing: bool,
}

impl Session {
    fn new(sdk: Arc<dyn MvSdk>) -> Self {
        Self {
            sdk,
            handle: None,
            opened: false,
            grabbing: false,
        }
    }

    fn handle(&self) -> Option<&SdkHandle> {
        self.handle.as_ref()
    }

    /// Stop streaming, close the device, destroy the handle. Best-effort.
    fn teardown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if self.grabbing {
            if let Err(e) = self.sdk.stop_grabbing(&handle) {
                warn!("teardown: {e}");
            }
            self.grabbing = false;
        }
        if self.opened {
            if let Err(e) = self.sdk.close_device(&handle) {
                warn!("teardown: {e}");
            }
            self.opened = false;
        }
        if let Err(e) = self.sdk.destroy_handle(&handle) {
            warn!("teardown: {e}");
        }
        info!("machine-vision session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub struct MachineVisionSource {
    descriptor: DeviceDescriptor,
    session: Session,
    negotiated: Option<PixelFormat>,
    payload_size: i64,
}

impl MachineVisionSource {
    pub fn open(
        sdk: Arc<dyn MvSdk>,
        descriptor: &DeviceDescriptor,
        settings: &MvSettings,
    ) -> Result<Self, OpenError> {
        sdk.initialize()
            .map_err(|e| OpenError::SdkUnavailable(e.to_string()))?;

        let layers = match descriptor.backend {
            BackendHint::Gige => MV_GIGE_DEVICE,
            BackendHint::Usb3 => MV_USB_DEVICE,
            BackendHint::Any | BackendHint::V4l2 => MV_GIGE_DEVICE | MV_USB_DEVICE,
        };
        let devices = sdk.enumerate(layers).map_err(device_error)?;
        if devices.is_empty() {
            return Err(OpenError::NoDeviceAvailable {
                tried: vec![descriptor.index],
            });
        }

        let index = descriptor.index.clamp(0, devices.len() as i32 - 1) as usize;
        let device: &DeviceEntry = &devices[index];
        info!(
            "opening machine-vision device {} of {} ({:?})",
            index,
            devices.len(),
            device.transport
        );

        let mut session = Session::new(Arc::clone(&sdk));
        let handle = sdk.create_handle(device).map_err(device_error)?;
        session.handle = Some(handle);
        let handle = &handle;

        sdk.open_device(handle, MV_ACCESS_EXCLUSIVE).map_err(device_error)?;
        session.opened = true;

        if device.transport == Transport::Gige {
            negotiate_packet_size(sdk.as_ref(), handle);
        }
        configure_trigger(sdk.as_ref(), handle, settings.trigger);
        if let Err(e) = sdk.set_float(handle, "ExposureTime", settings.exposure_us as f32) {
            warn!("exposure not applied: {e}");
        }
        let negotiated = negotiate_pixel_format(sdk.as_ref(), handle, settings.pixel_format);

        let payload_size = match sdk.get_int(handle, "PayloadSize") {
            Ok(size) if size > 0 => size,
            Ok(size) => {
                return Err(OpenError::Configure {
                    param: "PayloadSize".into(),
                    reason: format!("device reported {size}"),
                });
            }
            Err(e) => {
                return Err(OpenError::Configure {
                    param: "PayloadSize".into(),
                    reason: e.to_string(),
                });
            }
        };

        sdk.start_grabbing(handle).map_err(device_error)?;
        session.grabbing = true;
        info!(
            "machine-vision streaming started (payload {payload_size} bytes, format {negotiated:?})"
        );

        Ok(Self {
            descriptor: descriptor.clone(),
            session,
            negotiated,
            payload_size,
        })
    }

    pub fn negotiated_format(&self) -> Option<PixelFormat> {
        self.negotiated
    }

    pub fn payload_size(&self) -> i64 {
        self.payload_size
    }
}

impl FrameSource for MachineVisionSource {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError> {
        let sdk = self.session.sdk.as_ref();
        let handle = self
            .session
            .handle()
            .ok_or_else(|| ReadError::Protocol("device is closed".into()))?;

        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        let buffer = match sdk.get_image_buffer(handle, timeout_ms) {
            Ok(buffer) => buffer,
            Err(e) if e.is_timeout() => return Err(ReadError::Timeout),
            Err(e) => return Err(ReadError::Transient(e.to_string())),
        };

        let lease = BufferLease::new(sdk, handle, buffer);
        let info = lease.info();
        let format = pixel_format_from_type(info.pixel_type).ok_or_else(|| {
            ReadError::Protocol(format!("unsupported pixel type {:#010x}", info.pixel_type))
        })?;
        if self.negotiated.is_some_and(|n| n != format) {
            debug!("device delivered {format:?} instead of negotiated {:?}", self.negotiated);
        }

        Frame::from_sensor(lease.bytes(), info.width, info.height, format)
    }

    fn close(&mut self) {
        self.session.teardown();
    }
}

/// Opens machine-vision sources through a shared SDK instance.
pub struct MachineVisionOpener {
    sdk: Arc<dyn MvSdk>,
    settings: MvSettings,
}

impl MachineVisionOpener {
    pub fn new(sdk: Arc<dyn MvSdk>, settings: MvSettings) -> Self {
        Self { sdk, settings }
    }
}

impl SourceOpener for MachineVisionOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn FrameSource>, OpenError> {
        let source = MachineVisionSource::open(Arc::clone(&self.sdk), descriptor, &self.settings)?;
        Ok(Box::new(source))
    }
}

fn device_error(e: SdkError) -> OpenError {
    OpenError::Device(e.to_string())
}

fn negotiate_packet_size(sdk: &dyn MvSdk, handle: &SdkHandle) {
    match sdk.optimal_packet_size(handle) {
        Ok(size) if size > 0 => {
            if let Err(e) = sdk.set_int(handle, "GevSCPSPacketSize", size) {
                warn!("packet size {size} not applied: {e}");
            } else {
                debug!("GigE packet size set to {size}");
            }
        }
        Ok(_) => debug!("device has no packet size recommendation"),
        Err(e) => warn!("packet size query failed: {e}"),
    }
}

/// Apply the trigger mode; a rejected hardware setup falls back to free-running.
fn configure_trigger(sdk: &dyn MvSdk, handle: &SdkHandle, trigger: TriggerModeConfig) {
    let TriggerModeConfig::Hardware {
        line,
        rising_edge,
        delay_us,
    } = trigger
    else {
        if let Err(e) = sdk.set_enum(handle, "TriggerMode", 0) {
            warn!("could not select continuous acquisition: {e}");
        }
        return;
    };

    let hardware = sdk
        .set_enum(handle, "TriggerMode", 1)
        .and_then(|_| sdk.set_enum(handle, "TriggerSource", line))
        .and_then(|_| sdk.set_enum(handle, "TriggerActivation", if rising_edge { 0 } else { 1 }))
        .and_then(|_| sdk.set_float(handle, "TriggerDelay", delay_us as f32));

    if let Err(e) = hardware {
        warn!("hardware trigger rejected ({e}); falling back to continuous acquisition");
        if let Err(e) = sdk.set_enum(handle, "TriggerMode", 0) {
            warn!("could not select continuous acquisition: {e}");
        }
    }
}

/// Ask for `preferred`, then BGR8, then Mono8.
fn negotiate_pixel_format(
    sdk: &dyn MvSdk,
    handle: &SdkHandle,
    preferred: PixelFormat,
) -> Option<PixelFormat> {
    let mut candidates = vec![preferred];
    for format in [PixelFormat::Bgr8, PixelFormat::Mono8] {
        if !candidates.contains(&format) {
            candidates.push(format);
        }
    }

    for format in candidates {
        match sdk.set_enum(handle, "PixelFormat", pixel_type_code(format)) {
            Ok(()) => return Some(format),
            Err(e) => debug!("pixel format {format:?} rejected: {e}"),
        }
    }
    warn!("device accepted none of the supported pixel formats; relying on per-frame pixel type");
    None
}
