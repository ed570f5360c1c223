//! Device memory statistics.

/// Aggregated device memory statistics, as tracked by the layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes of device memory currently allocated through the layer.
    pub total_allocated: i64,

    /// Peak bytes allocated (high water mark).
    pub peak_allocated: i64,

    /// Successful vkAllocateMemory calls.
    pub allocation_count: u64,

    /// vkFreeMemory calls for handles the layer saw allocated.
    pub deallocation_count: u64,
}

impl MemoryStats {
    /// Allocations not yet freed.
    pub fn live_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }
}

impl std::fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Device Memory Statistics:")?;
        writeln!(f, "  Total allocated: {} bytes", self.total_allocated)?;
        writeln!(f, "  Peak allocated:  {} bytes", self.peak_allocated)?;
        writeln!(f, "  Allocations:     {}", self.allocation_count)?;
        writeln!(f, "  Deallocations:   {}", self.deallocation_count)?;
        writeln!(f, "  Live:            {}", self.live_allocations())?;
        Ok(())
    }
}

/// Host-side statistics of the tracked allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Bytes currently held by driver/loader host allocations.
    pub allocated_bytes: i64,

    /// High water mark of `allocated_bytes`.
    pub peak_bytes: i64,

    /// Number of blocks handed out.
    pub allocation_count: u64,

    /// Number of blocks returned.
    pub free_count: u64,
}
