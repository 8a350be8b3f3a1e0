//! Error taxonomy shared by the acquisition and trigger components.

use thiserror::Error;

/// A device or socket could not be acquired. Fatal to the component that hit
/// it, never to the process.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("no camera device available (tried indices {tried:?})")]
    NoDeviceAvailable { tried: Vec<i32> },

    #[error("camera SDK is unavailable: {0}")]
    SdkUnavailable(String),

    #[error("failed to open device: {0}")]
    Device(String),

    #[error("failed to configure device parameter {param}: {reason}")]
    Configure { param: String, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A single frame pull that did not yield a frame. None of these stop the loop.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Nothing arrived within the pull timeout; normal back-pressure
    #[error("no frame within the pull timeout")]
    Timeout,

    /// Device busy, frame dropped or similar; retry on the next poll
    #[error("transient read failure: {0}")]
    Transient(String),

    /// The device returned something we cannot interpret; the frame is dropped
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ReadError {
    /// Whether this miss deserves a log line above debug level.
    pub fn is_noteworthy(&self) -> bool {
        !matches!(self, ReadError::Timeout)
    }
}
