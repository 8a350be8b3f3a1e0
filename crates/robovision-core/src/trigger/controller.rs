//! Drains the trigger queue and drives the inspection counter.

use super::channel::{Inbound, TriggerMessage};
use crate::events::{EventSender, StationEvent};
use crate::lifecycle::{join_with_timeout, spawn_named};
use crate::Result;
use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Payload acknowledging a capture request
pub const CAPTURE_ACK: &str = "Capture:1";
/// Payload marking a finished inspection cycle (spelling is part of the protocol)
pub const CYCLE_COMPLETE: &str = "finnish";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCommand {
    CaptureAck,
    CycleComplete,
    Other(String),
}

impl TriggerCommand {
    /// Exact, case-sensitive match against the known payloads.
    pub fn parse(text: &str) -> Self {
        match text {
            CAPTURE_ACK => TriggerCommand::CaptureAck,
            CYCLE_COMPLETE => TriggerCommand::CycleComplete,
            other => TriggerCommand::Other(other.to_string()),
        }
    }
}

/// Completed-cycle count for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InspectionCounter {
    value: AtomicU64,
}

impl InspectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one and return the new count.
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Operator reset
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }
}

pub fn result_text(count: u64) -> String {
    format!("Count: {count}")
}

struct Run {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Consumer side of the trigger queue.
///
/// Owns the queue so it survives trigger channel restarts; hand
/// [`InspectionController::sender`] to each new channel.
pub struct InspectionController {
    tx: Sender<Inbound>,
    rx: Receiver<Inbound>,
    counter: Arc<InspectionCounter>,
    events: EventSender,
    drain_timeout: Duration,
    stop_timeout: Duration,
    run: Mutex<Option<Run>>,
}

impl InspectionController {
    pub fn new(
        queue_capacity: usize,
        counter: Arc<InspectionCounter>,
        events: EventSender,
        drain_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        let (tx, rx) = bounded(queue_capacity.max(1));
        Self {
            tx,
            rx,
            counter,
            events,
            drain_timeout,
            stop_timeout,
            run: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> Sender<Inbound> {
        self.tx.clone()
    }

    pub fn counter(&self) -> &Arc<InspectionCounter> {
        &self.counter
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    /// Start draining. No-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.run.lock();
        if slot.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("inspection controller already running");
            return Ok(());
        }
        if let Some(finished) = slot.take() {
            let _ = finished.handle.join();
        }

        let running = Arc::new(AtomicBool::new(true));
        let drain = Drain {
            rx: self.rx.clone(),
            counter: Arc::clone(&self.counter),
            events: self.events.clone(),
            timeout: self.drain_timeout,
            running: Arc::clone(&running),
        };
        let handle = spawn_named("inspection-controller", move || drain.run())
            .context("failed to spawn inspection controller")?;

        *slot = Some(Run { running, handle });
        info!("inspection controller started");
        Ok(())
    }

    /// Stop draining. No-op when not running; queued messages are kept.
    pub fn stop(&self) {
        let Some(run) = self.run.lock().take() else {
            return;
        };
        run.running.store(false, Ordering::Release);
        // Cut the current wait short; the flag is seen within one drain timeout anyway
        let _ = self.tx.try_send(Inbound::Wake);
        join_with_timeout(run.handle, self.stop_timeout, "inspection controller");
        info!("inspection controller stopped");
    }
}

impl Drop for InspectionController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Drain {
    rx: Receiver<Inbound>,
    counter: Arc<InspectionCounter>,
    events: EventSender,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

impl Drain {
    fn run(self) {
        while self.running.load(Ordering::Acquire) {
            match self.rx.recv_timeout(self.timeout) {
                Ok(Inbound::Message(message)) => self.handle(message),
                // Left over from an earlier stop, or ours
                Ok(Inbound::Wake) => continue,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("inspection controller exiting");
    }

    fn handle(&self, message: TriggerMessage) {
        let from = message
            .peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "local".to_string());

        match TriggerCommand::parse(&message.text) {
            TriggerCommand::CaptureAck => {
                info!("capture acknowledged by {from}");
                self.events.log(format!("Capture acknowledged ({from})"));
                self.events.send(StationEvent::CaptureRequested);
            }
            TriggerCommand::CycleComplete => {
                let count = self.counter.increment();
                info!("inspection cycle complete, count = {count}");
                self.events.result(result_text(count));
                self.events.log(format!("Cycle complete ({from})"));
            }
            TriggerCommand::Other(text) => {
                info!("trigger message from {from}: {text}");
                self.events.log(text);
            }
        }
    }
}
