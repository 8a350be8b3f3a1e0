//! Camera selection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which acquisition API drives the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraKind {
    /// Consumer webcam opened through the platform video API
    GenericCamera,
    /// GigE / USB3 machine-vision unit driven through the vendor SDK
    MachineVisionCamera,
}

/// Backend preference passed down to the frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendHint {
    /// Let the source pick
    Any,
    /// Video4Linux2 capture (generic cameras)
    V4l2,
    /// GigE Vision transport only (machine-vision cameras)
    Gige,
    /// USB3 Vision transport only (machine-vision cameras)
    Usb3,
}

/// Identifies one camera instance. Immutable once selected: switching cameras
/// means stopping and restarting the owning acquisition loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub kind: CameraKind,
    pub index: i32,
    pub backend: BackendHint,
}

impl DeviceDescriptor {
    pub fn generic(index: i32) -> Self {
        Self {
            kind: CameraKind::GenericCamera,
            index,
            backend: BackendHint::V4l2,
        }
    }

    pub fn machine_vision(index: i32) -> Self {
        Self {
            kind: CameraKind::MachineVisionCamera,
            index,
            backend: BackendHint::Any,
        }
    }

    pub fn with_backend(mut self, backend: BackendHint) -> Self {
        self.backend = backend;
        self
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            CameraKind::GenericCamera => "usb",
            CameraKind::MachineVisionCamera => "machine-vision",
        };
        write!(f, "{kind}#{}", self.index)
    }
}
