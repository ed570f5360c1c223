//! Tracked host heap for driver and loader allocations.

use std::alloc::{alloc, dealloc};
use std::ptr;

use crate::api::stats::HostStats;
use crate::sync::atomics::{AtomicCounter, AtomicGauge};
use crate::util::layout::{effective_align, header_span, BlockHeader};

/// Process-wide tracked heap.
///
/// Blocks handed to a driver can outlive the layer context (they are freed
/// during `vkDestroyInstance`), so the heap is static rather than owned by
/// the context.
pub static HOST_HEAP: TrackedHeap = TrackedHeap::new();

/// Wrapper around the global allocator that remembers each block's size and
/// alignment in a header, so a block can be freed or resized from its
/// pointer alone, the way `VkAllocationCallbacks` requires.
#[derive(Debug)]
pub struct TrackedHeap {
    /// Bytes currently allocated (user sizes)
    allocated: AtomicGauge,

    /// Blocks handed out
    allocations: AtomicCounter,

    /// Blocks returned
    frees: AtomicCounter,
}

impl TrackedHeap {
    /// Create a new tracked heap.
    pub const fn new() -> Self {
        Self {
            allocated: AtomicGauge::new(),
            allocations: AtomicCounter::new(0),
            frees: AtomicCounter::new(0),
        }
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// Returns null when the alignment is not a power of two or the system
    /// allocator fails.
    pub fn alloc(&self, size: usize, alignment: usize) -> *mut u8 {
        let Some(align) = effective_align(alignment) else {
            return ptr::null_mut();
        };
        let header = BlockHeader { size, align };
        let Some(layout) = header.outer_layout() else {
            return ptr::null_mut();
        };

        // SAFETY: layout has a non-zero size (the header span is never empty)
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return ptr::null_mut();
        }

        // SAFETY: header_span(align) <= layout.size(), and the header slot
        // sits inside the span right before the user pointer
        unsafe {
            let user = base.add(header_span(align));
            header_slot(user).write_unaligned(header);
            self.allocated.add(size as i64);
            self.allocations.increment();
            user
        }
    }

    /// Resize a block, keeping its contents up to the smaller size.
    ///
    /// Follows `PFN_vkReallocationFunction`: a null `ptr` allocates, a zero
    /// `size` frees and returns null.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize, alignment: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(size, alignment);
        }
        if size == 0 {
            self.free(ptr);
            return ptr::null_mut();
        }

        let old = header_slot(ptr).read_unaligned();
        let fresh = self.alloc(size, alignment.max(old.align));
        if fresh.is_null() {
            // The original block stays valid on failure.
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(ptr, fresh, old.size.min(size));
        self.free(ptr);
        fresh
    }

    /// Return a block to the heap. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block from this heap.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = header_slot(ptr).read_unaligned();
        let Some(layout) = header.outer_layout() else {
            return;
        };
        dealloc(ptr.sub(header_span(header.align)), layout);
        self.allocated.sub(header.size as i64);
        self.frees.increment();
    }

    /// Get current statistics.
    pub fn stats(&self) -> HostStats {
        HostStats {
            allocated_bytes: self.allocated.get(),
            peak_bytes: self.allocated.peak(),
            allocation_count: self.allocations.get(),
            free_count: self.frees.get(),
        }
    }
}

impl Default for TrackedHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of the header for a user pointer.
unsafe fn header_slot(user: *mut u8) -> *mut BlockHeader {
    user.sub(std::mem::size_of::<BlockHeader>()) as *mut BlockHeader
}
