//! Robovision computer vision
//!
//! OpenCV-backed parts of the station: the USB camera source, the
//! rotation-tolerant pattern matcher and the two-pattern alignment stage.

pub mod alignment;
pub mod annotate;
pub mod bbox;
pub mod camera;
pub mod matching;
pub mod utils;

// Re-export commonly used types
pub use alignment::{AlignmentInspector, AlignmentReport};
pub use bbox::{BBox, MatchResult, MatchSet};
pub use camera::{UsbCameraSource, UsbOpener};
pub use matching::{MatchOutcome, Matcher};

// Error handling
pub type Result<T> = anyhow::Result<T>;

/// Seams between the stages
pub mod traits {
    use super::*;
    use opencv::core::Mat;

    /// Something that locates a pattern in a BGR or grayscale image
    pub trait MatchEngine: Send + Sync {
        fn match_image(&self, image: &Mat) -> Result<MatchOutcome>;
    }
}
