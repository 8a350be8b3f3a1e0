//! Robovision core
//!
//! Hardware-free building blocks of the inspection station: the frame model,
//! the acquisition loop that keeps a "latest frame" mailbox fresh, the network
//! trigger path that feeds the inspection counter, and the display hand-off
//! that keeps worker threads away from UI state.

pub mod acquisition;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod lifecycle;
pub mod mailbox;
pub mod native;
pub mod trigger;

// Re-export commonly used types
pub use acquisition::{AcquisitionLoop, AcquisitionState, FrameSource, OpenResult, SourceOpener};
pub use config::StationConfig;
pub use device::{CameraKind, DeviceDescriptor};
pub use display::{DisplaySink, RefreshLoop};
pub use error::{OpenError, ReadError};
pub use events::{EventSender, StationEvent};
pub use frame::{Frame, PixelFormat};
pub use geometry::{AlignmentGeometry, Point2};
pub use mailbox::Mailbox;
pub use trigger::{InspectionController, InspectionCounter, TriggerChannel, TriggerMessage};

// Error handling
pub type Result<T> = anyhow::Result<T>;
