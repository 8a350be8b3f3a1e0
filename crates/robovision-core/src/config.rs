//! Station configuration.
//!
//! One TOML file with a section per subsystem. Every field has a named
//! default so a partial (or missing) file still yields a usable station.

use crate::device::{BackendHint, DeviceDescriptor};
use crate::frame::PixelFormat;
use crate::trigger::Framing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Main station configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub camera: CameraConfig,
    pub machine_vision: MachineVisionConfig,
    pub trigger: TriggerConfig,
    pub inspection: InspectionParams,
    pub matching: MatchingConfig,
    pub display: DisplayConfig,
}

/// Camera selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraSource {
    #[serde(rename = "USB", alias = "usb")]
    Usb,
    #[serde(rename = "MachineVision", alias = "Hikrobot")]
    MachineVision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: CameraSource,
    pub device_index: i32,
    pub backend: BackendHint,
    /// How long one frame pull may wait
    pub read_timeout_ms: u64,
    /// Pause between pulls, bounds CPU use when no frame is ready
    pub poll_interval_ms: u64,
    /// Bound on joining the acquisition thread
    pub stop_timeout_ms: u64,
}

/// Trigger setup for the machine-vision camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerModeConfig {
    /// Free-running acquisition
    Continuous,
    /// Frame per hardware edge on an input line
    Hardware { line: u32, rising_edge: bool, delay_us: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineVisionConfig {
    /// Explicit SDK library path; skips discovery when set
    pub library_path: Option<PathBuf>,
    /// Extra directories searched for the SDK library
    pub search_dirs: Vec<PathBuf>,
    pub pull_timeout_ms: u32,
    pub exposure_us: i64,
    pub pixel_format: PixelFormat,
    pub trigger: TriggerModeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub host: String,
    pub port: u16,
    pub framing: Framing,
    /// Bytes per socket read
    pub read_buffer: usize,
    pub queue_capacity: usize,
    pub read_timeout_ms: u64,
    /// Idle sleep between non-blocking accept attempts
    pub accept_poll_ms: u64,
    pub stop_timeout_ms: u64,
    /// How long the inspection controller waits for a message before re-checking its flag
    pub drain_timeout_ms: u64,
}

/// Part inspection parameters. Carried as a bag for the inspection stage;
/// the station itself does not interpret them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionParams {
    /// Minimum blob area in pixels
    pub large_area: i64,
    /// Tolerance zone around the expected position
    pub dif_zone: i64,
    pub h_oring: i64,
    pub w_oring: i64,
    pub blur_kernel: i64,
    pub canny_thresh1: i64,
    pub canny_thresh2: i64,
    pub morph_kernel: i64,
    pub rect_height_ratio: f64,
}

/// Per-pattern matcher parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    pub max_count: usize,
    pub score_threshold: f64,
    /// Detections overlapping more than this (IoU) are collapsed
    pub iou_threshold: f64,
    /// Allowed in-plane rotation, degrees either way
    pub angle_tolerance_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub pattern_a: Option<PathBuf>,
    pub pattern_b: Option<PathBuf>,
    pub params_a: MatchParams,
    pub params_b: MatchParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub refresh_interval_ms: u64,
    /// Where the latest frame is written as PNG; disabled when unset
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_interval_ms: u64,
    /// Annotated alignment output
    pub output_dir: PathBuf,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSource::Usb,
            device_index: 0,
            backend: BackendHint::V4l2,
            read_timeout_ms: 100,
            poll_interval_ms: 30,
            stop_timeout_ms: 1000,
        }
    }
}

impl Default for MachineVisionConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            search_dirs: Vec::new(),
            pull_timeout_ms: 2000,
            exposure_us: 5000,
            pixel_format: PixelFormat::Rgb8,
            trigger: TriggerModeConfig::Hardware {
                line: 0,
                rising_edge: true,
                delay_us: 1,
            },
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            framing: Framing::Raw,
            read_buffer: 1024,
            queue_capacity: 256,
            read_timeout_ms: 2000,
            accept_poll_ms: 50,
            stop_timeout_ms: 3000,
            drain_timeout_ms: 200,
        }
    }
}

impl Default for InspectionParams {
    fn default() -> Self {
        Self {
            large_area: 5000,
            dif_zone: 0,
            h_oring: 65,
            w_oring: 110,
            blur_kernel: 15,
            canny_thresh1: 50,
            canny_thresh2: 90,
            morph_kernel: 15,
            rect_height_ratio: 0.5,
        }
    }
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            max_count: 1,
            score_threshold: 0.6,
            iou_threshold: 0.8,
            angle_tolerance_deg: 5.0,
        }
    }
}

impl MatchParams {
    /// Looser, nearly rotation-free settings used for the second feature
    pub fn secondary() -> Self {
        Self {
            max_count: 1,
            score_threshold: 0.4,
            iou_threshold: 0.6,
            angle_tolerance_deg: 1.0,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            pattern_a: None,
            pattern_b: None,
            params_a: MatchParams::default(),
            params_b: MatchParams::secondary(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 50,
            snapshot_dir: None,
            snapshot_interval_ms: 1000,
            output_dir: "outputs".into(),
        }
    }
}

impl CameraConfig {
    /// Descriptor for the configured camera
    pub fn descriptor(&self) -> DeviceDescriptor {
        let descriptor = match self.source {
            CameraSource::Usb => DeviceDescriptor::generic(self.device_index),
            CameraSource::MachineVision => DeviceDescriptor::machine_vision(self.device_index),
        };
        descriptor.with_backend(self.backend)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl TriggerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl StationConfig {
    /// Parse a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    ///
    /// An unreadable or invalid file falls back to defaults and is left untouched.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("{:?} not found, creating it with default settings", path);
            let config = Self::default();
            if let Err(e) = config.save(path) {
                warn!("could not write default config: {e}");
            }
            return config;
        }

        match Self::load(path) {
            Ok(config) => {
                info!(
                    "loaded config: camera source = {:?}, large_area = {}",
                    config.camera.source, config.inspection.large_area
                );
                config
            }
            Err(e) => {
                warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("station.toml");

        let config = StationConfig::load_or_create(&path);
        assert_eq!(config, StationConfig::default());
        assert!(path.exists());
        assert_eq!(StationConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_named_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("station.toml");
        fs::write(
            &path,
            "[camera]\nsource = \"Hikrobot\"\n\n[inspection]\nlarge_area = 4200\n",
        )?;

        let config = StationConfig::load(&path)?;
        assert_eq!(config.camera.source, CameraSource::MachineVision);
        assert_eq!(config.inspection.large_area, 4200);
        assert_eq!(config.inspection.w_oring, 110);
        assert_eq!(config.trigger.port, 5001);
        Ok(())
    }

    #[test]
    fn test_invalid_file_falls_back_without_clobbering() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("station.toml");
        fs::write(&path, "[camera\nsource = ")?;

        let config = StationConfig::load_or_create(&path);
        assert_eq!(config, StationConfig::default());
        assert_eq!(fs::read_to_string(&path)?, "[camera\nsource = ");
        Ok(())
    }

    #[test]
    fn test_changes_round_trip_through_save() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("station.toml");

        let mut config = StationConfig::default();
        config.machine_vision.trigger = TriggerModeConfig::Continuous;
        config.trigger.framing = Framing::Newline;
        config.matching.pattern_a = Some("patterns/a.png".into());
        config.save(&path)?;

        assert_eq!(StationConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_descriptor_follows_source() {
        let mut camera = CameraConfig::default();
        camera.source = CameraSource::MachineVision;
        camera.device_index = 2;
        camera.backend = BackendHint::Gige;

        let descriptor = camera.descriptor();
        assert_eq!(descriptor.kind, crate::device::CameraKind::MachineVisionCamera);
        assert_eq!(descriptor.index, 2);
        assert_eq!(descriptor.backend, BackendHint::Gige);
    }
}
