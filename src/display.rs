//! Display sink for running without a screen
//!
//! Status, result and log lines go to the tracing output; the newest frame
//! can be written out as a PNG snapshot, and capture requests run the
//! alignment inspection on the frame they carry.

use crate::align::write_inspection;
use parking_lot::Mutex;
use robovision_core::config::DisplayConfig;
use robovision_core::{DisplaySink, Frame};
use robovision_cv::{utils::ImageUtils, AlignmentInspector, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const SNAPSHOT_FILE: &str = "latest.png";

/// What an operator would currently see
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayView {
    pub status: String,
    pub result: String,
    pub last_log: String,
    pub frames_shown: u64,
    /// Width and height of the frame on screen; `None` shows the placeholder
    pub frame_size: Option<(u32, u32)>,
    pub captures: Vec<PathBuf>,
}

pub struct HeadlessDisplay {
    view: Arc<Mutex<DisplayView>>,
    snapshot_dir: Option<PathBuf>,
    snapshot_interval: Duration,
    last_snapshot: Option<Instant>,
    output_dir: PathBuf,
    inspector: Option<AlignmentInspector>,
}

impl HeadlessDisplay {
    pub fn new(config: &DisplayConfig, inspector: Option<AlignmentInspector>) -> Self {
        Self {
            view: Arc::new(Mutex::new(DisplayView {
                result: "No result yet.".to_string(),
                ..DisplayView::default()
            })),
            snapshot_dir: config.snapshot_dir.clone(),
            snapshot_interval: Duration::from_millis(config.snapshot_interval_ms),
            last_snapshot: None,
            output_dir: config.output_dir.clone(),
            inspector,
        }
    }

    /// Shared handle on the current view; stays valid after the sink moves
    /// into a refresh loop.
    pub fn view(&self) -> Arc<Mutex<DisplayView>> {
        Arc::clone(&self.view)
    }

    fn snapshot_due(&self, now: Instant) -> bool {
        self.last_snapshot
            .map_or(true, |last| now.duration_since(last) >= self.snapshot_interval)
    }

    fn write_snapshot(dir: &Path, frame: &Frame) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SNAPSHOT_FILE);
        ImageUtils::frame_to_rgb(frame)?.save(&path)?;
        Ok(path)
    }

    fn inspect(&self, inspector: &AlignmentInspector, frame: &Frame) -> Result<(PathBuf, String)> {
        let image = ImageUtils::frame_to_mat(frame)?;
        let report = inspector.inspect(&image)?;
        let stem = format!("capture_{}", frame.captured_at.format("%Y%m%d_%H%M%S_%3f"));
        let path = write_inspection(&image, &report, &self.output_dir, &stem)?;
        Ok((path, report.summary()))
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show_frame(&mut self, frame: Arc<Frame>) {
        {
            let mut view = self.view.lock();
            view.frames_shown += 1;
            view.frame_size = Some((frame.width, frame.height));
        }

        let Some(dir) = self.snapshot_dir.clone() else {
            return;
        };
        let now = Instant::now();
        if !self.snapshot_due(now) {
            return;
        }
        self.last_snapshot = Some(now);
        match Self::write_snapshot(&dir, &frame) {
            Ok(path) => debug!("snapshot written to {:?}", path),
            Err(e) => warn!("snapshot failed: {e:#}"),
        }
    }

    fn show_placeholder(&mut self) {
        self.view.lock().frame_size = None;
        info!("no camera feed");
    }

    fn show_status(&mut self, text: &str) {
        info!("status: {text}");
        self.view.lock().status = text.to_string();
    }

    fn show_result(&mut self, text: &str) {
        info!("result: {text}");
        self.view.lock().result = text.to_string();
    }

    fn show_log(&mut self, text: &str) {
        info!("log: {text}");
        self.view.lock().last_log = text.to_string();
    }

    fn capture_requested(&mut self, frame: Option<Arc<Frame>>) {
        let Some(inspector) = &self.inspector else {
            debug!("capture requested; alignment patterns are not configured");
            return;
        };
        let Some(frame) = frame else {
            warn!("capture requested but no frame is available");
            return;
        };

        match self.inspect(inspector, &frame) {
            Ok((path, summary)) => {
                info!("capture inspected: {summary} -> {:?}", path);
                let mut view = self.view.lock();
                view.last_log = summary;
                view.captures.push(path);
            }
            Err(e) => warn!("capture inspection failed: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robovision_core::frame::PixelFormat;

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::new(vec![0; 4 * 3 * 3], 4, 3, PixelFormat::Bgr8).expect("valid frame"))
    }

    #[test]
    fn test_view_tracks_events() {
        let mut display = HeadlessDisplay::new(&DisplayConfig::default(), None);
        let view = display.view();
        assert_eq!(view.lock().result, "No result yet.");

        display.show_status("Connected");
        display.show_result("Count: 2");
        display.show_frame(frame());
        assert_eq!(view.lock().frame_size, Some((4, 3)));

        display.show_placeholder();
        let view = view.lock();
        assert_eq!(view.status, "Connected");
        assert_eq!(view.result, "Count: 2");
        assert_eq!(view.frames_shown, 1);
        assert_eq!(view.frame_size, None);
    }

    #[test]
    fn test_snapshots_are_rate_limited() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = DisplayConfig {
            snapshot_dir: Some(dir.path().to_path_buf()),
            snapshot_interval_ms: 60_000,
            ..DisplayConfig::default()
        };
        let mut display = HeadlessDisplay::new(&config, None);

        display.show_frame(frame());
        let path = dir.path().join(SNAPSHOT_FILE);
        assert!(path.exists());
        std::fs::remove_file(&path)?;

        display.show_frame(frame());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_capture_without_patterns_is_ignored() {
        let mut display = HeadlessDisplay::new(&DisplayConfig::default(), None);
        display.capture_requested(Some(frame()));
        assert!(display.view().lock().captures.is_empty());
    }
}
