//! Next-layer function tables.
//!
//! Tables are resolved once, right after the next layer created the object,
//! and never change afterwards. The core entry points come from `ash`'s
//! generated tables; an entry the next layer does not expose is replaced by
//! a stub that panics if called.

use std::ffi::{c_char, c_void, CStr};
use std::ptr;

use ash::vk;

use crate::allocators::LowerAllocation;

/// Resolved functions of the next layer for one instance.
pub struct InstanceDispatch {
    /// The instance this table was resolved for.
    pub instance: vk::Instance,
    /// Next layer's `vkGetInstanceProcAddr`.
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub core: vk::InstanceFnV1_0,
    /// Substitute allocator handed down at creation, kept alive with the
    /// instance.
    allocation: Option<Box<LowerAllocation>>,
}

impl InstanceDispatch {
    /// Resolve the table through the next layer's `vkGetInstanceProcAddr`.
    ///
    /// # Safety
    ///
    /// `get_instance_proc_addr` must be a valid resolver for `instance`.
    pub unsafe fn load(
        instance: vk::Instance,
        get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    ) -> Self {
        let core = vk::InstanceFnV1_0::load(|name| {
            resolve(get_instance_proc_addr(instance, name.as_ptr()))
        });
        Self {
            instance,
            get_instance_proc_addr,
            core,
            allocation: None,
        }
    }

    /// Keep the substitute allocator alive as long as this table.
    pub fn with_allocation(mut self, allocation: Box<LowerAllocation>) -> Self {
        self.allocation = Some(allocation);
        self
    }

    /// Substitute callbacks the instance was created with.
    pub fn allocation_callbacks(&self) -> Option<vk::AllocationCallbacks> {
        self.allocation.as_deref().map(LowerAllocation::callbacks)
    }

    /// Ask the next layer for an instance-level function.
    ///
    /// # Safety
    ///
    /// `name` must be a valid NUL-terminated string.
    pub unsafe fn proc_addr(&self, name: *const c_char) -> vk::PFN_vkVoidFunction {
        (self.get_instance_proc_addr)(self.instance, name)
    }
}

/// Resolved functions of the next layer for one device.
pub struct DeviceDispatch {
    /// The device this table was resolved for.
    pub device: vk::Device,
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    /// Next layer's `vkGetDeviceProcAddr`.
    pub get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    pub core: vk::DeviceFnV1_0,
    pub swapchain: vk::KhrSwapchainFn,
    allocation: Option<Box<LowerAllocation>>,
}

impl DeviceDispatch {
    /// Resolve the table through the next layer's `vkGetDeviceProcAddr`.
    ///
    /// # Safety
    ///
    /// `get_device_proc_addr` must be a valid resolver for `device`.
    pub unsafe fn load(
        device: vk::Device,
        get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
        get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    ) -> Self {
        let mut load = |name: &CStr| resolve(get_device_proc_addr(device, name.as_ptr()));
        Self {
            device,
            get_instance_proc_addr,
            get_device_proc_addr,
            core: vk::DeviceFnV1_0::load(&mut load),
            swapchain: vk::KhrSwapchainFn::load(&mut load),
            allocation: None,
        }
    }

    /// Keep the substitute allocator alive as long as this table.
    pub fn with_allocation(mut self, allocation: Box<LowerAllocation>) -> Self {
        self.allocation = Some(allocation);
        self
    }

    /// Substitute callbacks the device was created with.
    pub fn allocation_callbacks(&self) -> Option<vk::AllocationCallbacks> {
        self.allocation.as_deref().map(LowerAllocation::callbacks)
    }

    /// Ask the next layer for a device-level function.
    ///
    /// # Safety
    ///
    /// `name` must be a valid NUL-terminated string.
    pub unsafe fn proc_addr(&self, name: *const c_char) -> vk::PFN_vkVoidFunction {
        (self.get_device_proc_addr)(self.device, name)
    }
}

fn resolve(function: vk::PFN_vkVoidFunction) -> *const c_void {
    function.map_or(ptr::null(), |f| f as *const c_void)
}
