//! Frame acquisition
//!
//! A [`FrameSource`] hides whichever camera API produces the frames; an
//! [`AcquisitionLoop`] owns one source on its own thread and keeps the
//! shared "latest frame" mailbox fresh.

pub mod machine_vision;

use crate::config::{CameraConfig, CameraSource, StationConfig};
use crate::device::DeviceDescriptor;
use crate::error::{OpenError, ReadError};
use crate::events::EventSender;
use crate::frame::Frame;
use crate::lifecycle::{join_with_timeout, spawn_named};
use crate::mailbox::Mailbox;
use crate::Result;
use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use machine_vision::{MachineVisionOpener, MachineVisionSource};

/// An opened camera.
pub trait FrameSource: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Pull the next frame, waiting at most `timeout`.
    fn read_frame(&mut self, timeout: Duration) -> std::result::Result<Frame, ReadError>;

    /// Release the device. Idempotent; implementations also release on drop.
    fn close(&mut self);
}

/// Outcome of opening a camera
pub type OpenResult = std::result::Result<Box<dyn FrameSource>, OpenError>;

/// Opens frame sources for descriptors.
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &DeviceDescriptor) -> OpenResult;
}

impl<F> SourceOpener for F
where
    F: Fn(&DeviceDescriptor) -> OpenResult + Send + Sync,
{
    fn open(&self, descriptor: &DeviceDescriptor) -> OpenResult {
        self(descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Running,
    Stopping,
}

/// Timing of the acquisition thread
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&CameraConfig::default())
    }
}

impl From<&CameraConfig> for LoopSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            poll_interval: config.poll_interval(),
            stop_timeout: config.stop_timeout(),
        }
        .covering_read()
    }
}

/// Machine-vision pulls wait `pull_timeout_ms` instead of the camera read timeout.
impl From<&StationConfig> for LoopSettings {
    fn from(config: &StationConfig) -> Self {
        let settings = Self::from(&config.camera);
        match config.camera.source {
            CameraSource::MachineVision => {
                let pull = u64::from(config.machine_vision.pull_timeout_ms);
                settings.with_read_timeout(Duration::from_millis(pull))
            }
            CameraSource::Usb => settings,
        }
    }
}

impl LoopSettings {
    /// Slack on top of one pull and one poll interval when joining the worker
    pub const STOP_MARGIN: Duration = Duration::from_millis(500);

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.covering_read()
    }

    /// Raise the stop timeout so the join outlasts a pull that is already waiting.
    /// A shorter join would report `Idle` while the worker still holds the device.
    pub fn covering_read(mut self) -> Self {
        let floor = self.read_timeout + self.poll_interval + Self::STOP_MARGIN;
        self.stop_timeout = self.stop_timeout.max(floor);
        self
    }
}

/// State shared with the worker so it can report its own exit. The generation
/// keeps a detached worker from an older run from touching a newer one.
#[derive(Debug)]
struct SharedState {
    cell: Mutex<(u64, AcquisitionState)>,
}

impl SharedState {
    fn begin(&self) -> u64 {
        let mut cell = self.cell.lock();
        cell.0 += 1;
        cell.1 = AcquisitionState::Running;
        cell.0
    }

    fn set(&self, generation: u64, state: AcquisitionState) {
        let mut cell = self.cell.lock();
        if cell.0 == generation {
            cell.1 = state;
        }
    }

    fn get(&self) -> AcquisitionState {
        self.cell.lock().1
    }
}

struct Worker {
    generation: u64,
    descriptor: DeviceDescriptor,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns one frame source at a time.
///
/// `Idle -> Running -> Stopping -> Idle`. Start and stop may be called from
/// any thread; both are serialized and neither blocks longer than the
/// configured stop timeout.
pub struct AcquisitionLoop {
    opener: Arc<dyn SourceOpener>,
    mailbox: Arc<Mailbox<Frame>>,
    events: EventSender,
    settings: LoopSettings,
    shared: Arc<SharedState>,
    worker: Mutex<Option<Worker>>,
}

impl AcquisitionLoop {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        mailbox: Arc<Mailbox<Frame>>,
        events: EventSender,
        settings: LoopSettings,
    ) -> Self {
        Self {
            opener,
            mailbox,
            events,
            settings: settings.covering_read(),
            shared: Arc::new(SharedState {
                cell: Mutex::new((0, AcquisitionState::Idle)),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == AcquisitionState::Running
    }

    /// Descriptor of the current run, if a worker exists.
    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.worker.lock().as_ref().map(|w| w.descriptor.clone())
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<Frame>> {
        &self.mailbox
    }

    /// Start acquiring from `descriptor`. No-op while a run is active.
    ///
    /// The device is opened on the worker thread; a failed open is reported
    /// through the event channel and leaves the loop `Idle`.
    pub fn start(&self, descriptor: DeviceDescriptor) -> Result<()> {
        let mut slot = self.worker.lock();

        if let Some(worker) = slot.as_ref() {
            if !worker.handle.is_finished() {
                if worker.descriptor != descriptor {
                    warn!(
                        "acquisition already running on {}; stop it before selecting {}",
                        worker.descriptor, descriptor
                    );
                } else {
                    debug!("acquisition already running on {descriptor}");
                }
                return Ok(());
            }
        }

        // A previous run that ended on its own (e.g. failed open)
        if let Some(finished) = slot.take() {
            if finished.handle.join().is_err() {
                warn!("previous acquisition thread panicked");
            }
        }

        let generation = self.shared.begin();
        let running = Arc::new(AtomicBool::new(true));

        let context = WorkerContext {
            generation,
            descriptor: descriptor.clone(),
            opener: Arc::clone(&self.opener),
            mailbox: Arc::clone(&self.mailbox),
            events: self.events.clone(),
            settings: self.settings,
            shared: Arc::clone(&self.shared),
            running: Arc::clone(&running),
        };

        let handle = match spawn_named("acquisition", move || context.run()) {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set(generation, AcquisitionState::Idle);
                return Err(e).context("failed to spawn acquisition thread");
            }
        };

        *slot = Some(Worker {
            generation,
            descriptor,
            running,
            handle,
        });
        Ok(())
    }

    /// Stop the current run and release the camera. Idempotent.
    pub fn stop(&self) {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return;
        };

        self.shared.set(worker.generation, AcquisitionState::Stopping);
        worker.running.store(false, Ordering::Release);

        if !join_with_timeout(worker.handle, self.settings.stop_timeout, "acquisition loop") {
            warn!("camera {} will be released when its pending read returns", worker.descriptor);
        }

        self.mailbox.reset();
        self.shared.set(worker.generation, AcquisitionState::Idle);
        self.events.status("Disconnected");
        info!("acquisition on {} stopped", worker.descriptor);
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Closes the source on every exit path of the worker, panics included.
struct SourceGuard(Box<dyn FrameSource>);

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

struct WorkerContext {
    generation: u64,
    descriptor: DeviceDescriptor,
    opener: Arc<dyn SourceOpener>,
    mailbox: Arc<Mailbox<Frame>>,
    events: EventSender,
    settings: LoopSettings,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
}

impl WorkerContext {
    fn run(self) {
        let source = match self.opener.open(&self.descriptor) {
            Ok(source) => source,
            Err(e) => {
                error!("cannot open {}: {e}", self.descriptor);
                self.events.status(format!("Camera error: {e}"));
                self.shared.set(self.generation, AcquisitionState::Idle);
                return;
            }
        };
        let mut source = SourceGuard(source);

        info!("acquisition started on {}", self.descriptor);
        self.events.status(format!("Connected: {}", self.descriptor));

        let mut frames = 0u64;
        while self.running.load(Ordering::Acquire) {
            match source.0.read_frame(self.settings.read_timeout) {
                Ok(frame) => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    self.mailbox.publish(frame);
                    self.events.frame_ready();
                    frames += 1;
                }
                Err(e) if e.is_noteworthy() => warn!("{}: {e}", self.descriptor),
                Err(e) => debug!("{}: {e}", self.descriptor),
            }
            thread::sleep(self.settings.poll_interval);
        }

        drop(source);
        debug!("acquisition thread for {} exiting after {frames} frames", self.descriptor);
    }
}
