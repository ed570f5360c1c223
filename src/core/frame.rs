//! Frame counter.

use crate::sync::atomics::AtomicCounter;

/// Monotonic count of presented frames.
///
/// Only `vkQueuePresentKHR` advances it; everything else reads it to stamp
/// records with the current frame.
#[derive(Debug, Default)]
pub struct FrameCounter {
    frames: AtomicCounter,
}

impl FrameCounter {
    pub const fn new() -> Self {
        Self {
            frames: AtomicCounter::new(0),
        }
    }

    /// Index of the frame in progress.
    pub fn current(&self) -> u64 {
        self.frames.get()
    }

    /// Move to the next frame, returning the index of the one that ended.
    pub fn advance(&self) -> u64 {
        self.frames.increment()
    }
}
