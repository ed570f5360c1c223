//! Live device memory tracking.

use std::collections::HashMap;

use crate::api::stats::MemoryStats;
use crate::sync::atomics::{AtomicCounter, AtomicGauge};
use crate::sync::mutex::Mutex;
use crate::telemetry::{MemorySnapshot, MemoryUsageRecord};
use crate::util::time::timestamp_micros;

#[derive(Debug, Clone, Copy)]
struct LiveAllocation {
    size: u64,
    frame: u64,
    allocated_at: i64,
}

/// Device memory allocations currently alive, plus running totals.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    live: Mutex<HashMap<u64, LiveAllocation>>,
    allocated: AtomicGauge,
    allocations: AtomicCounter,
    deallocations: AtomicCounter,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful `vkAllocateMemory`.
    pub fn record_allocation(&self, memory: u64, size: u64, frame: u64) {
        let allocation = LiveAllocation {
            size,
            frame,
            allocated_at: timestamp_micros(),
        };
        let replaced = self.live.lock().insert(memory, allocation);
        if let Some(stale) = replaced {
            // The driver reused a handle we never saw freed.
            self.allocated.sub(stale.size as i64);
        }
        self.allocated.add(size as i64);
        self.allocations.increment();
    }

    /// Record a `vkFreeMemory`.
    ///
    /// Returns the completed lifetime when the handle was allocated through
    /// the layer; unknown and null handles yield `None`.
    pub fn record_free(&self, memory: u64, frame: u64) -> Option<MemoryUsageRecord> {
        let allocation = self.live.lock().remove(&memory)?;
        self.allocated.sub(allocation.size as i64);
        self.deallocations.increment();

        Some(MemoryUsageRecord {
            device_memory: memory,
            frame_allocated: allocation.frame,
            allocated_at: allocation.allocated_at,
            allocation_size: allocation.size,
            frame_deallocated: frame,
            deallocated_at: timestamp_micros(),
        })
    }

    /// Size of a live allocation.
    pub fn size_of(&self, memory: u64) -> Option<u64> {
        self.live.lock().get(&memory).map(|a| a.size)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_allocated: self.allocated.get(),
            peak_allocated: self.allocated.peak(),
            allocation_count: self.allocations.get(),
            deallocation_count: self.deallocations.get(),
        }
    }

    /// Current totals as a snapshot record.
    pub fn snapshot(&self) -> MemorySnapshot {
        let stats = self.stats();
        MemorySnapshot {
            timestamp: timestamp_micros(),
            total_allocated: stats.total_allocated,
            allocation_count: stats.allocation_count,
            deallocation_count: stats.deallocation_count,
        }
    }
}
