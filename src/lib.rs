//! Robovision station
//!
//! Session wiring around the core and cv crates: the [`StationContext`] that
//! owns every worker, the headless display sink and the offline alignment run.

pub mod align;
pub mod display;
pub mod station;

pub use display::HeadlessDisplay;
pub use station::{CameraOpener, StationContext};
