//! Substitute allocation callbacks for intercepted create calls.
//!
//! Every `vkCreateInstance`/`vkCreateDevice` that passes through the layer
//! hands the next layer a [`vk::AllocationCallbacks`] whose allocate,
//! reallocate and free entries point here. Allocation always lands in
//! [`HOST_HEAP`] so every host block the driver asks for is attributable.
//! Reallocation and free go to the application's own callbacks when it
//! supplied some, and to the tracked heap otherwise. The two notification
//! callbacks forward to the application unchanged.

use std::ffi::c_void;

use ash::vk;

use super::heap::HOST_HEAP;
use crate::diagnostics::{self, VMI301, VMI302};

/// Record of the application's allocator behind one substitute callback set.
///
/// The substitute callbacks carry a pointer to this record in `pUserData`,
/// and drivers keep using those callbacks for the lifetime of the object
/// they were passed to. The record is therefore boxed and owned by that
/// object's dispatch table, and holds a copy of the application's callbacks
/// rather than a pointer into the caller's frame.
#[derive(Debug, Clone, Copy)]
pub struct LowerAllocation {
    /// The application's callbacks, if it passed any.
    original: Option<vk::AllocationCallbacks>,
}

// SAFETY: Vulkan requires allocation callbacks to be callable from any
// thread; the record itself is never mutated after construction.
unsafe impl Send for LowerAllocation {}
unsafe impl Sync for LowerAllocation {}

impl LowerAllocation {
    pub fn new(original: Option<vk::AllocationCallbacks>) -> Self {
        Self { original }
    }

    /// Copy the `pAllocator` argument of an intercepted call.
    ///
    /// # Safety
    ///
    /// `p_allocator` must be null or point to valid callbacks.
    pub unsafe fn from_raw(p_allocator: *const vk::AllocationCallbacks) -> Self {
        Self::new(p_allocator.as_ref().copied())
    }

    /// The application's callbacks, if any.
    pub fn original(&self) -> Option<&vk::AllocationCallbacks> {
        self.original.as_ref()
    }

    /// Build the substitute callback set pointing back at `self`.
    ///
    /// `self` must not move while the callbacks are in use.
    pub fn callbacks(&self) -> vk::AllocationCallbacks {
        vk::AllocationCallbacks {
            p_user_data: self as *const Self as *mut c_void,
            pfn_allocation: Some(allocation_function),
            pfn_reallocation: Some(reallocation_function),
            pfn_free: Some(free_function),
            pfn_internal_allocation: Some(internal_allocation_notification),
            pfn_internal_free: Some(internal_free_notification),
        }
    }
}

/// Recover the record from `pUserData`, reporting VMI302 when it is missing.
unsafe fn lower<'a>(p_user_data: *mut c_void) -> Option<&'a LowerAllocation> {
    let lower = (p_user_data as *const LowerAllocation).as_ref();
    if lower.is_none() {
        diagnostics::emit(&VMI302);
    }
    lower
}

unsafe extern "system" fn allocation_function(
    p_user_data: *mut c_void,
    size: usize,
    alignment: usize,
    _allocation_scope: vk::SystemAllocationScope,
) -> *mut c_void {
    let _ = lower(p_user_data);

    let block = HOST_HEAP.alloc(size, alignment);
    if block.is_null() {
        diagnostics::emit_with_context(
            &VMI301,
            &format!("size={}, alignment={}", size, alignment),
        );
    }
    block as *mut c_void
}

unsafe extern "system" fn reallocation_function(
    p_user_data: *mut c_void,
    p_original: *mut c_void,
    size: usize,
    alignment: usize,
    allocation_scope: vk::SystemAllocationScope,
) -> *mut c_void {
    if let Some(callbacks) = lower(p_user_data).and_then(LowerAllocation::original) {
        if let Some(realloc) = callbacks.pfn_reallocation {
            return realloc(
                callbacks.p_user_data,
                p_original,
                size,
                alignment,
                allocation_scope,
            );
        }
    }

    let block = HOST_HEAP.realloc(p_original as *mut u8, size, alignment);
    if block.is_null() && size != 0 {
        diagnostics::emit_with_context(
            &VMI301,
            &format!("realloc size={}, alignment={}", size, alignment),
        );
    }
    block as *mut c_void
}

unsafe extern "system" fn free_function(p_user_data: *mut c_void, p_memory: *mut c_void) {
    if let Some(callbacks) = lower(p_user_data).and_then(LowerAllocation::original) {
        if let Some(free) = callbacks.pfn_free {
            return free(callbacks.p_user_data, p_memory);
        }
    }
    HOST_HEAP.free(p_memory as *mut u8);
}

unsafe extern "system" fn internal_allocation_notification(
    p_user_data: *mut c_void,
    size: usize,
    allocation_type: vk::InternalAllocationType,
    allocation_scope: vk::SystemAllocationScope,
) {
    if let Some(callbacks) = lower(p_user_data).and_then(LowerAllocation::original) {
        if let Some(notify) = callbacks.pfn_internal_allocation {
            notify(callbacks.p_user_data, size, allocation_type, allocation_scope);
        }
    }
}

unsafe extern "system" fn internal_free_notification(
    p_user_data: *mut c_void,
    size: usize,
    allocation_type: vk::InternalAllocationType,
    allocation_scope: vk::SystemAllocationScope,
) {
    if let Some(callbacks) = lower(p_user_data).and_then(LowerAllocation::original) {
        if let Some(notify) = callbacks.pfn_internal_free {
            notify(callbacks.p_user_data, size, allocation_type, allocation_scope);
        }
    }
}
