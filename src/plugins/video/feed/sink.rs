use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::super::types::DecodedFrame;

/// Single-slot mailbox holding the most recent decoded frame.
///
/// The decoder publishes, the display refresh takes. A frame that is not taken
/// before the next publish is discarded: the display only ever wants the
/// latest picture.
#[derive(Default)]
pub struct FrameSink {
    slot: Mutex<Option<DecodedFrame>>,
    feed_stopped: AtomicBool,
    published: AtomicU64,
    overwritten: AtomicU64,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<DecodedFrame>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces whatever frame is waiting with `frame`.
    pub fn publish(&self, frame: DecodedFrame) {
        let previous = self.lock().replace(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the frame published since the last call, or `None` if nothing
    /// new arrived. Never waits on the decoder beyond the slot swap.
    pub fn take_latest(&self) -> Option<DecodedFrame> {
        self.lock().take()
    }

    /// Marks the feed as finished. Called by the decoder on exit.
    pub fn close(&self) {
        self.feed_stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.feed_stopped.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames replaced before the display got to them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}
