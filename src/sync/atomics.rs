//! Atomic helpers for statistics and counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonic atomic counter.
#[derive(Debug)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter, returning the value it held before.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A signed atomic gauge for byte totals that go up and down, with a
/// high-water mark.
#[derive(Debug, Default)]
pub struct AtomicGauge {
    current: AtomicI64,
    peak: AtomicI64,
}

impl AtomicGauge {
    /// Create a new gauge at zero.
    pub const fn new() -> Self {
        Self {
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        }
    }

    /// Add to the gauge, returning the new value.
    pub fn add(&self, value: i64) -> i64 {
        let now = self.current.fetch_add(value, Ordering::Relaxed) + value;
        self.update_peak(now);
        now
    }

    /// Subtract from the gauge, returning the new value.
    pub fn sub(&self, value: i64) -> i64 {
        self.current.fetch_sub(value, Ordering::Relaxed) - value
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Highest value observed so far.
    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    fn update_peak(&self, value: i64) {
        let mut peak = self.peak.load(Ordering::Relaxed);
        while value > peak {
            match self.peak.compare_exchange_weak(
                peak,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}
