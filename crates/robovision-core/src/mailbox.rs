//! Single-slot, latest-wins hand-off between one writer and many readers.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds at most one value. Each `publish` replaces the previous value;
/// readers get an `Arc` and can never mutate what was published.
///
/// An empty slot is the placeholder state shown before the first frame and
/// after the owning loop stops.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: RwLock<Option<Arc<T>>>,
    sequence: AtomicU64,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    /// Replace the current content. Returns the new sequence number.
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let mut slot = self.slot.write();
        *slot = Some(value);
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    /// Latest value together with the sequence it was published under.
    pub fn snapshot(&self) -> (u64, Option<Arc<T>>) {
        let slot = self.slot.read();
        (self.sequence.load(Ordering::Acquire), slot.clone())
    }

    /// Number of publications (including resets) so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Back to the placeholder state.
    pub fn reset(&self) {
        let mut slot = self.slot.write();
        *slot = None;
        self.sequence.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
