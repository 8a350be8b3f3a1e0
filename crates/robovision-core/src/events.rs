//! Messages from worker threads to the display side.
//!
//! Workers never mutate display state directly; they post a `StationEvent`
//! and the refresh loop applies it on its own thread.

use crossbeam_channel::{Receiver, Sender, TrySendError, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// The frame mailbox holds a new frame
    FrameReady,
    /// Connection / lifecycle status line
    Status(String),
    /// Inspection result text (e.g. the running count)
    Result(String),
    /// Free-form log line for the operator
    Log(String),
    /// An external trigger asked for an inspection of the current frame
    CaptureRequested,
}

/// Cloneable sending side. Never blocks the caller.
///
/// Frame notifications are collapsed: while one `FrameReady` is waiting to be
/// handled, further ones are dropped, so the channel does not grow with the
/// camera's frame rate.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<StationEvent>,
    frame_pending: Arc<AtomicBool>,
}

/// Receiving side, owned by the refresh loop.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<StationEvent>,
    frame_pending: Arc<AtomicBool>,
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    let frame_pending = Arc::new(AtomicBool::new(false));
    (
        EventSender {
            tx,
            frame_pending: Arc::clone(&frame_pending),
        },
        EventReceiver { rx, frame_pending },
    )
}

impl EventSender {
    pub fn send(&self, event: StationEvent) {
        if event == StationEvent::FrameReady && self.frame_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(TrySendError::Disconnected(event)) = self.tx.try_send(event) {
            debug!("display side is gone; dropping {:?}", event);
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.send(StationEvent::Status(text.into()));
    }

    pub fn result(&self, text: impl Into<String>) {
        self.send(StationEvent::Result(text.into()));
    }

    pub fn log(&self, text: impl Into<String>) {
        self.send(StationEvent::Log(text.into()));
    }

    pub fn frame_ready(&self) {
        self.send(StationEvent::FrameReady);
    }
}

impl EventReceiver {
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<StationEvent> {
        let event = self.rx.recv_timeout(timeout).ok()?;
        self.mark_handled(&event);
        Some(event)
    }

    pub fn try_recv(&self) -> Option<StationEvent> {
        let event = self.rx.try_recv().ok()?;
        self.mark_handled(&event);
        Some(event)
    }

    fn mark_handled(&self, event: &StationEvent) {
        if *event == StationEvent::FrameReady {
            self.frame_pending.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_notifications_collapse_until_handled() {
        let (tx, rx) = event_channel();
        tx.frame_ready();
        tx.frame_ready();
        tx.status("connected");

        assert_eq!(rx.try_recv(), Some(StationEvent::FrameReady));
        assert_eq!(rx.try_recv(), Some(StationEvent::Status("connected".into())));
        assert_eq!(rx.try_recv(), None);

        tx.frame_ready();
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Some(StationEvent::FrameReady));
    }

    #[test]
    fn test_send_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = event_channel();
        drop(rx);
        tx.log("nobody listens");
    }
}
