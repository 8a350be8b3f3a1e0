//! Camera sources backed by OpenCV video capture

pub mod usb;

pub use usb::{SCAN_SPAN, UsbCameraSource, UsbOpener};
