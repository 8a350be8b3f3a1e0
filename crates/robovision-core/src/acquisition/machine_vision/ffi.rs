//! [`MvSdk`] over the vendor's C library, loaded at runtime with `libloading`.

use super::sdk::{
    DeviceEntry, LentBuffer, MV_E_HANDLE, MV_E_PARAMETER, MvSdk, SdkError, SdkHandle, SdkResult,
    Transport, check,
};
use crate::native::locate_mvs_library;
use anyhow::Context;
use libloading::Library;
use std::ffi::{CString, c_char, c_int, c_uint, c_void};
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::{debug, info};

const MAX_DEVICES: usize = 256;

#[repr(C)]
struct DeviceInfoList {
    count: c_uint,
    devices: [*mut DeviceInfoHead; MAX_DEVICES],
}

/// Leading fields of the SDK device record; the rest is never read here.
#[repr(C)]
#[allow(dead_code)]
struct DeviceInfoHead {
    major_ver: u16,
    minor_ver: u16,
    mac_high: c_uint,
    mac_low: c_uint,
    tlayer_type: c_uint,
}

#[repr(C)]
#[allow(dead_code)]
struct FrameInfoHead {
    width: u16,
    height: u16,
    pixel_type: c_uint,
    frame_num: c_uint,
    dev_ts_high: c_uint,
    dev_ts_low: c_uint,
    reserved0: c_uint,
    host_ts: i64,
    frame_len: c_uint,
    // The SDK's frame record grows between releases; leave room for all of them.
    tail: [u8; 2048],
}

#[repr(C)]
#[allow(dead_code)]
struct FrameOut {
    buf_addr: *mut u8,
    info: FrameInfoHead,
    reserved: [c_uint; 16],
}

#[repr(C)]
#[allow(dead_code)]
struct IntValueEx {
    current: i64,
    max: i64,
    min: i64,
    inc: i64,
    reserved: [c_uint; 16],
}

type FnNoArgs = unsafe extern "C" fn() -> c_int;
type FnEnumDevices = unsafe extern "C" fn(c_uint, *mut DeviceInfoList) -> c_int;
type FnCreateHandle = unsafe extern "C" fn(*mut *mut c_void, *const DeviceInfoHead) -> c_int;
type FnOpenDevice = unsafe extern "C" fn(*mut c_void, c_uint, u16) -> c_int;
type FnHandle = unsafe extern "C" fn(*mut c_void) -> c_int;
type FnSetInt = unsafe extern "C" fn(*mut c_void, *const c_char, i64) -> c_int;
type FnSetFloat = unsafe extern "C" fn(*mut c_void, *const c_char, f32) -> c_int;
type FnSetEnum = unsafe extern "C" fn(*mut c_void, *const c_char, c_uint) -> c_int;
type FnGetInt = unsafe extern "C" fn(*mut c_void, *const c_char, *mut IntValueEx) -> c_int;
type FnGetImage = unsafe extern "C" fn(*mut c_void, *mut FrameOut, c_uint) -> c_int;
type FnFreeImage = unsafe extern "C" fn(*mut c_void, *mut FrameOut) -> c_int;

/// The loaded vendor library with every entry point resolved up front.
pub struct MvsLibrary {
    path: PathBuf,
    initialize: Option<FnNoArgs>,
    finalize: Option<FnNoArgs>,
    enum_devices: FnEnumDevices,
    create_handle: FnCreateHandle,
    open_device: FnOpenDevice,
    optimal_packet_size: FnHandle,
    set_int: FnSetInt,
    set_float: FnSetFloat,
    set_enum: FnSetEnum,
    get_int: FnGetInt,
    start_grabbing: FnHandle,
    get_image_buffer: FnGetImage,
    free_image_buffer: FnFreeImage,
    stop_grabbing: FnHandle,
    close_device: FnHandle,
    destroy_handle: FnHandle,
    // Must outlive the function pointers above.
    _library: Library,
}

macro_rules! required {
    ($lib:expr, $ty:ty, $name:literal) => {{
        // SAFETY: the symbol type matches the vendor's C declaration.
        let symbol = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
            .with_context(|| format!("symbol {} missing from camera SDK", $name))?;
        *symbol
    }};
}

macro_rules! optional {
    ($lib:expr, $ty:ty, $name:literal) => {{
        // SAFETY: as above; older SDK releases lack these entry points.
        unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }.ok().map(|symbol| *symbol)
    }};
}

impl MvsLibrary {
    /// Locate the library (explicit path, environment, search dirs) and load it.
    pub fn discover(explicit: Option<&Path>, extra_dirs: &[PathBuf]) -> crate::Result<Self> {
        let path = locate_mvs_library(explicit, extra_dirs)?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        debug!("loading camera SDK from {:?}", path);
        // SAFETY: loading runs the library's initializers; the vendor SDK has none
        // with preconditions beyond being loaded once per path.
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load camera SDK {:?}", path))?;

        let sdk = Self {
            path: path.to_path_buf(),
            initialize: optional!(library, FnNoArgs, "MV_CC_Initialize"),
            finalize: optional!(library, FnNoArgs, "MV_CC_Finalize"),
            enum_devices: required!(library, FnEnumDevices, "MV_CC_EnumDevices"),
            create_handle: required!(library, FnCreateHandle, "MV_CC_CreateHandle"),
            open_device: required!(library, FnOpenDevice, "MV_CC_OpenDevice"),
            optimal_packet_size: required!(library, FnHandle, "MV_CC_GetOptimalPacketSize"),
            set_int: required!(library, FnSetInt, "MV_CC_SetIntValueEx"),
            set_float: required!(library, FnSetFloat, "MV_CC_SetFloatValue"),
            set_enum: required!(library, FnSetEnum, "MV_CC_SetEnumValue"),
            get_int: required!(library, FnGetInt, "MV_CC_GetIntValueEx"),
            start_grabbing: required!(library, FnHandle, "MV_CC_StartGrabbing"),
            get_image_buffer: required!(library, FnGetImage, "MV_CC_GetImageBuffer"),
            free_image_buffer: required!(library, FnFreeImage, "MV_CC_FreeImageBuffer"),
            stop_grabbing: required!(library, FnHandle, "MV_CC_StopGrabbing"),
            close_device: required!(library, FnHandle, "MV_CC_CloseDevice"),
            destroy_handle: required!(library, FnHandle, "MV_CC_DestroyHandle"),
            _library: library,
        };
        info!("camera SDK loaded from {:?}", sdk.path);
        Ok(sdk)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MvsLibrary {
    fn drop(&mut self) {
        if let Some(finalize) = self.finalize {
            // SAFETY: no handles outlive the library; sources hold an Arc to it.
            unsafe { finalize() };
        }
    }
}

fn raw(handle: &SdkHandle) -> *mut c_void {
    handle.0 as *mut c_void
}

fn key(call: &'static str, name: &str) -> SdkResult<CString> {
    CString::new(name).map_err(|_| SdkError::new(call, MV_E_PARAMETER))
}

// SAFETY (applies to every call below): arguments are either handles the SDK
// created, NUL-terminated keys, or out-parameters sized for the SDK's structs.
impl MvSdk for MvsLibrary {
    fn initialize(&self) -> SdkResult<()> {
        match self.initialize {
            Some(initialize) => check("MV_CC_Initialize", unsafe { initialize() }),
            None => Ok(()),
        }
    }

    fn enumerate(&self, layers: u32) -> SdkResult<Vec<DeviceEntry>> {
        let mut list = Box::new(DeviceInfoList {
            count: 0,
            devices: [ptr::null_mut(); MAX_DEVICES],
        });
        check("MV_CC_EnumDevices", unsafe { (self.enum_devices)(layers, &mut *list) })?;

        let count = (list.count as usize).min(MAX_DEVICES);
        let entries = list.devices[..count]
            .iter()
            .enumerate()
            .filter(|(_, info)| !info.is_null())
            .map(|(index, &info)| DeviceEntry {
                index,
                transport: Transport::from_layer(unsafe { (*info).tlayer_type }),
                raw: info as usize,
            })
            .collect();
        Ok(entries)
    }

    fn create_handle(&self, device: &DeviceEntry) -> SdkResult<SdkHandle> {
        let mut handle: *mut c_void = ptr::null_mut();
        let info = device.raw as *const DeviceInfoHead;
        check("MV_CC_CreateHandle", unsafe { (self.create_handle)(&mut handle, info) })?;
        if handle.is_null() {
            return Err(SdkError::new("MV_CC_CreateHandle", MV_E_HANDLE));
        }
        Ok(SdkHandle(handle as usize))
    }

    fn open_device(&self, handle: &SdkHandle, access: u32) -> SdkResult<()> {
        check("MV_CC_OpenDevice", unsafe { (self.open_device)(raw(handle), access, 0) })
    }

    fn optimal_packet_size(&self, handle: &SdkHandle) -> SdkResult<i64> {
        // Returns the size itself, or a negative status.
        let value = unsafe { (self.optimal_packet_size)(raw(handle)) };
        if value < 0 {
            return Err(SdkError::new("MV_CC_GetOptimalPacketSize", value as u32));
        }
        Ok(value as i64)
    }

    fn set_int(&self, handle: &SdkHandle, name: &str, value: i64) -> SdkResult<()> {
        let name = key("MV_CC_SetIntValueEx", name)?;
        check("MV_CC_SetIntValueEx", unsafe { (self.set_int)(raw(handle), name.as_ptr(), value) })
    }

    fn set_float(&self, handle: &SdkHandle, name: &str, value: f32) -> SdkResult<()> {
        let name = key("MV_CC_SetFloatValue", name)?;
        check("MV_CC_SetFloatValue", unsafe { (self.set_float)(raw(handle), name.as_ptr(), value) })
    }

    fn set_enum(&self, handle: &SdkHandle, name: &str, value: u32) -> SdkResult<()> {
        let name = key("MV_CC_SetEnumValue", name)?;
        check("MV_CC_SetEnumValue", unsafe { (self.set_enum)(raw(handle), name.as_ptr(), value) })
    }

    fn get_int(&self, handle: &SdkHandle, name: &str) -> SdkResult<i64> {
        let name = key("MV_CC_GetIntValueEx", name)?;
        let mut value = IntValueEx {
            current: 0,
            max: 0,
            min: 0,
            inc: 0,
            reserved: [0; 16],
        };
        check("MV_CC_GetIntValueEx", unsafe {
            (self.get_int)(raw(handle), name.as_ptr(), &mut value)
        })?;
        Ok(value.current)
    }

    fn start_grabbing(&self, handle: &SdkHandle) -> SdkResult<()> {
        check("MV_CC_StartGrabbing", unsafe { (self.start_grabbing)(raw(handle)) })
    }

    fn get_image_buffer(&self, handle: &SdkHandle, timeout_ms: u32) -> SdkResult<LentBuffer> {
        // Boxed so the record keeps its address until it is handed back.
        // SAFETY: FrameOut is plain data; all-zero is a valid (empty) record.
        let mut frame: Box<FrameOut> = Box::new(unsafe { std::mem::zeroed() });
        check("MV_CC_GetImageBuffer", unsafe {
            (self.get_image_buffer)(raw(handle), &mut *frame, timeout_ms)
        })?;

        let buffer = LentBuffer {
            width: u32::from(frame.info.width),
            height: u32::from(frame.info.height),
            pixel_type: frame.info.pixel_type,
            data: frame.buf_addr.cast_const(),
            len: frame.info.frame_len as usize,
            token: Box::into_raw(frame) as usize,
        };
        Ok(buffer)
    }

    fn free_image_buffer(&self, handle: &SdkHandle, buffer: &LentBuffer) -> SdkResult<()> {
        if buffer.token == 0 {
            return Ok(());
        }
        // SAFETY: the token came from Box::into_raw in get_image_buffer and each
        // lent buffer is returned exactly once.
        let mut frame = unsafe { Box::from_raw(buffer.token as *mut FrameOut) };
        check("MV_CC_FreeImageBuffer", unsafe {
            (self.free_image_buffer)(raw(handle), &mut *frame)
        })
    }

    fn stop_grabbing(&self, handle: &SdkHandle) -> SdkResult<()> {
        check("MV_CC_StopGrabbing", unsafe { (self.stop_grabbing)(raw(handle)) })
    }

    fn close_device(&self, handle: &SdkHandle) -> SdkResult<()> {
        check("MV_CC_CloseDevice", unsafe { (self.close_device)(raw(handle)) })
    }

    fn destroy_handle(&self, handle: &SdkHandle) -> SdkResult<()> {
        check("MV_CC_DestroyHandle", unsafe { (self.destroy_handle)(raw(handle)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_record_head_layout() {
        // Host timestamp sits at byte 24 of the SDK's frame record.
        assert_eq!(std::mem::offset_of!(FrameInfoHead, host_ts), 24);
        assert_eq!(std::mem::offset_of!(FrameOut, info), std::mem::size_of::<*mut u8>());
    }

    #[test]
    fn test_missing_library_reports_path() {
        let err = MvsLibrary::load(Path::new("/nonexistent/libMvCameraControl.so"))
            .err()
            .map(|e| e.to_string());
        assert!(err.is_some_and(|msg| msg.contains("libMvCameraControl.so")));
    }
}
