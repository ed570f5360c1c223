//! Layout utilities for the header-prefixed host heap.

use std::alloc::Layout;

/// Minimum alignment of every block handed out by the host heap.
pub const MIN_ALIGN: usize = 16;

/// Align a size up to the given power-of-two alignment.
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Size of the header region placed in front of a user block.
///
/// The region is a whole multiple of the alignment so the user pointer keeps
/// the requested alignment.
#[inline]
pub const fn header_span(align: usize) -> usize {
    align_up(std::mem::size_of::<BlockHeader>(), align)
}

/// Bookkeeping stored immediately before each user block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BlockHeader {
    /// Requested user size in bytes.
    pub size: usize,
    /// Effective alignment of the block.
    pub align: usize,
}

impl BlockHeader {
    /// Layout of the full underlying allocation (header span + user bytes).
    ///
    /// Returns `None` when the alignment is not a power of two or the total
    /// size overflows.
    pub fn outer_layout(&self) -> Option<Layout> {
        let total = header_span(self.align).checked_add(self.size)?;
        Layout::from_size_align(total.max(1), self.align).ok()
    }
}

/// Normalize a Vulkan-supplied alignment (which may be 0) to a usable one.
#[inline]
pub fn effective_align(requested: usize) -> Option<usize> {
    let align = requested.max(MIN_ALIGN);
    align.is_power_of_two().then_some(align)
}
