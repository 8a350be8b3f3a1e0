//! Display hand-off.
//!
//! Worker threads only send [`StationEvent`]s. The [`RefreshLoop`] is the one
//! thread that touches the [`DisplaySink`]: every tick it applies pending
//! events and shows the newest mailbox frame at most once.

use crate::events::{EventReceiver, StationEvent};
use crate::frame::Frame;
use crate::lifecycle::{join_with_timeout, spawn_named};
use crate::mailbox::Mailbox;
use crate::Result;
use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Whatever presents the station to the operator.
pub trait DisplaySink: Send {
    fn show_frame(&mut self, frame: Arc<Frame>);

    /// The mailbox was cleared (camera disconnected).
    fn show_placeholder(&mut self) {}

    fn show_status(&mut self, text: &str);

    fn show_result(&mut self, text: &str);

    fn show_log(&mut self, text: &str);

    /// A trigger asked for an inspection; `frame` is the newest one, if any.
    fn capture_requested(&mut self, frame: Option<Arc<Frame>>);
}

struct Refresher {
    sink: Box<dyn DisplaySink>,
    mailbox: Arc<Mailbox<Frame>>,
    events: EventReceiver,
    interval: Duration,
    running: Arc<AtomicBool>,
    shown: u64,
}

impl Refresher {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            let tick_end = Instant::now() + self.interval;

            // Wait for the first event of the tick, then take whatever else is queued
            let mut next = self.events.recv_timeout(self.interval);
            while let Some(event) = next {
                self.apply(event);
                next = self.events.try_recv();
            }
            self.refresh_frame();

            let now = Instant::now();
            if now < tick_end {
                std::thread::sleep(tick_end - now);
            }
        }
        debug!("refresh loop exiting");
    }

    fn apply(&mut self, event: StationEvent) {
        match event {
            // Picked up by refresh_frame
            StationEvent::FrameReady => {}
            StationEvent::Status(text) => self.sink.show_status(&text),
            StationEvent::Result(text) => self.sink.show_result(&text),
            StationEvent::Log(text) => self.sink.show_log(&text),
            StationEvent::CaptureRequested => self.sink.capture_requested(self.mailbox.latest()),
        }
    }

    fn refresh_frame(&mut self) {
        let (sequence, latest) = self.mailbox.snapshot();
        if sequence == self.shown {
            return;
        }
        self.shown = sequence;
        match latest {
            Some(frame) => self.sink.show_frame(frame),
            None => self.sink.show_placeholder(),
        }
    }
}

/// Fixed-rate display refresh on its own thread.
pub struct RefreshLoop {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl RefreshLoop {
    pub fn start(
        sink: Box<dyn DisplaySink>,
        mailbox: Arc<Mailbox<Frame>>,
        events: EventReceiver,
        interval: Duration,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let shown = mailbox.sequence();
        let refresher = Refresher {
            sink,
            mailbox,
            events,
            interval,
            running: Arc::clone(&running),
            shown,
        };
        let handle = spawn_named("display-refresh", move || refresher.run())
            .context("failed to spawn display refresh thread")?;
        info!("display refresh every {interval:?}");

        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
            stop_timeout: interval * 4 + Duration::from_millis(100),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        join_with_timeout(handle, self.stop_timeout, "display refresh");
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
