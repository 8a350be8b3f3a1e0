//! One operator session.
//!
//! [`StationContext`] is built once from the configuration and owns every
//! worker of the station: the acquisition loop feeding the frame mailbox, the
//! trigger channel and the inspection controller draining it. UI actions map
//! onto its methods; none of them block longer than the configured stop
//! timeouts.

use anyhow::{bail, Context};
use parking_lot::Mutex;
use robovision_core::acquisition::machine_vision::{MachineVisionOpener, MvSettings, MvsLibrary};
use robovision_core::acquisition::LoopSettings;
use robovision_core::config::{CameraSource, StationConfig};
use robovision_core::device::{CameraKind, DeviceDescriptor};
use robovision_core::error::OpenError;
use robovision_core::{
    AcquisitionLoop, EventSender, Frame, InspectionController, InspectionCounter, Mailbox,
    OpenResult, SourceOpener, TriggerChannel,
};
use robovision_cv::{Result, UsbOpener};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

pub const STARTED_TEXT: &str = "STARTED processing...";
pub const RESET_TEXT: &str = "RESET.";

/// Routes a descriptor to the API that drives its kind of camera.
pub struct CameraOpener {
    usb: UsbOpener,
    machine_vision: Option<MachineVisionOpener>,
}

impl CameraOpener {
    pub fn new(usb: UsbOpener, machine_vision: Option<MachineVisionOpener>) -> Self {
        Self { usb, machine_vision }
    }

    /// Loads the machine-vision SDK when the configured source needs it, so a
    /// missing SDK is reported at startup rather than on first connect.
    pub fn from_config(config: &StationConfig) -> Result<Self> {
        let machine_vision = match config.camera.source {
            CameraSource::MachineVision => {
                let mv = &config.machine_vision;
                let library = MvsLibrary::discover(mv.library_path.as_deref(), &mv.search_dirs)
                    .context("Machine-vision camera selected but its SDK is unavailable")?;
                Some(MachineVisionOpener::new(Arc::new(library), MvSettings::from(mv)))
            }
            CameraSource::Usb => None,
        };
        Ok(Self::new(UsbOpener::default(), machine_vision))
    }
}

impl SourceOpener for CameraOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> OpenResult {
        match descriptor.kind {
            CameraKind::GenericCamera => self.usb.open(descriptor),
            CameraKind::MachineVisionCamera => match &self.machine_vision {
                Some(opener) => opener.open(descriptor),
                None => Err(OpenError::SdkUnavailable(
                    "machine-vision SDK was not loaded".to_string(),
                )),
            },
        }
    }
}

pub struct StationContext {
    config: StationConfig,
    mailbox: Arc<Mailbox<Frame>>,
    counter: Arc<InspectionCounter>,
    events: EventSender,
    acquisition: AcquisitionLoop,
    trigger: Mutex<Option<TriggerChannel>>,
    controller: InspectionController,
    shut_down: AtomicBool,
}

impl StationContext {
    pub fn new(config: StationConfig, events: EventSender) -> Result<Self> {
        let opener = CameraOpener::from_config(&config)?;
        Ok(Self::with_opener(config, events, Arc::new(opener)))
    }

    /// Build the session around an explicit camera opener.
    pub fn with_opener(
        config: StationConfig,
        events: EventSender,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let mailbox = Arc::new(Mailbox::new());
        let counter = Arc::new(InspectionCounter::new());

        let settings = LoopSettings::from(&config);
        let acquisition =
            AcquisitionLoop::new(opener, Arc::clone(&mailbox), events.clone(), settings);

        let controller = InspectionController::new(
            config.trigger.queue_capacity,
            Arc::clone(&counter),
            events.clone(),
            config.trigger.drain_timeout(),
            config.trigger.stop_timeout(),
        );

        Self {
            config,
            mailbox,
            counter,
            events,
            acquisition,
            trigger: Mutex::new(None),
            controller,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<Frame>> {
        &self.mailbox
    }

    pub fn counter(&self) -> &Arc<InspectionCounter> {
        &self.counter
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn acquisition(&self) -> &AcquisitionLoop {
        &self.acquisition
    }

    pub fn controller(&self) -> &InspectionController {
        &self.controller
    }

    /// Start acquiring from the configured camera. No-op while connected.
    pub fn connect_camera(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            bail!("Station is shut down");
        }
        let descriptor = self.config.camera.descriptor();
        info!("connecting {descriptor}");
        self.acquisition.start(descriptor)
    }

    pub fn disconnect_camera(&self) {
        self.acquisition.stop();
    }

    pub fn is_camera_running(&self) -> bool {
        self.acquisition.is_running()
    }

    /// Start the inspection controller and the trigger listener.
    ///
    /// A bind failure is reported through the status line and leaves the
    /// trigger path idle; the camera is unaffected.
    pub fn start_trigger(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            bail!("Station is shut down");
        }
        let mut slot = self.trigger.lock();
        if slot.as_ref().is_some_and(TriggerChannel::is_running) {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            stale.stop(self.config.trigger.stop_timeout());
        }

        self.controller.start()?;
        match TriggerChannel::start(&self.config.trigger, self.controller.sender()) {
            Ok(channel) => {
                self.events.status(format!("Trigger listening on {}", channel.local_addr()));
                *slot = Some(channel);
                Ok(())
            }
            Err(e) => {
                error!("trigger channel failed to start: {e}");
                self.events.status(format!("Trigger error: {e}"));
                self.controller.stop();
                Err(e.into())
            }
        }
    }

    pub fn stop_trigger(&self) {
        let channel = self.trigger.lock().take();
        if let Some(channel) = channel {
            channel.stop(self.config.trigger.stop_timeout());
            self.events.status("Trigger stopped");
        }
        self.controller.stop();
    }

    pub fn is_trigger_running(&self) -> bool {
        self.trigger.lock().as_ref().is_some_and(TriggerChannel::is_running)
    }

    /// Address the trigger listener is bound to, while it runs.
    pub fn trigger_addr(&self) -> Option<SocketAddr> {
        self.trigger.lock().as_ref().map(TriggerChannel::local_addr)
    }

    pub fn start_process(&self) {
        info!("processing started");
        self.events.result(STARTED_TEXT);
    }

    /// Operator reset: the count starts over.
    pub fn reset_process(&self) {
        self.counter.reset();
        info!("inspection count reset");
        self.events.result(RESET_TEXT);
    }

    /// Navigating away from the live view releases the camera.
    pub fn leave_page(&self) {
        self.disconnect_camera();
    }

    /// Stop every worker. Only the first call does anything.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down station");
        self.stop_trigger();
        self.disconnect_camera();
        info!("station stopped");
    }
}

impl Drop for StationContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
