//! Exported entry points.
//!
//! The loader finds the layer through three symbols:
//! `vkNegotiateLoaderLayerInterfaceVersion`, `vkGetInstanceProcAddr` and
//! `vkGetDeviceProcAddr`. Every other intercepted function is reached through
//! those resolvers and forwards to the matching [`LayerContext`] method.
//!
//! [`LayerContext`]: crate::core::context::LayerContext

#![allow(non_snake_case)]

use std::ffi::{c_char, CStr};
use std::mem;

use ash::vk;

use super::chain::{NegotiateLayerInterface, NegotiateStructType};
use crate::core::context;
use crate::diagnostics::{self, VMI001, VMI003};

/// Loader-layer interface version this layer implements.
pub const LAYER_INTERFACE_VERSION: u32 = 2;

macro_rules! void_fn {
    ($f:expr, $pfn:ty) => {
        Some(mem::transmute::<$pfn, unsafe extern "system" fn()>($f as $pfn))
    };
}

/// Layer's own implementation of an instance-level name, if it has one.
/// Device-level names are included: the loader may resolve them through
/// `vkGetInstanceProcAddr`.
fn instance_function(name: &[u8]) -> vk::PFN_vkVoidFunction {
    // SAFETY: every entry is transmuted from its exact PFN type
    unsafe {
        match name {
            b"vkGetInstanceProcAddr" => {
                void_fn!(vkGetInstanceProcAddr, vk::PFN_vkGetInstanceProcAddr)
            }
            b"vkCreateInstance" => void_fn!(create_instance, vk::PFN_vkCreateInstance),
            b"vkDestroyInstance" => void_fn!(destroy_instance, vk::PFN_vkDestroyInstance),
            b"vkCreateDevice" => void_fn!(create_device, vk::PFN_vkCreateDevice),
            _ => device_function(name),
        }
    }
}

/// Layer's own implementation of a device-level name, if it has one.
fn device_function(name: &[u8]) -> vk::PFN_vkVoidFunction {
    // SAFETY: every entry is transmuted from its exact PFN type
    unsafe {
        match name {
            b"vkGetDeviceProcAddr" => void_fn!(vkGetDeviceProcAddr, vk::PFN_vkGetDeviceProcAddr),
            b"vkDestroyDevice" => void_fn!(destroy_device, vk::PFN_vkDestroyDevice),
            b"vkAllocateMemory" => void_fn!(allocate_memory, vk::PFN_vkAllocateMemory),
            b"vkFreeMemory" => void_fn!(free_memory, vk::PFN_vkFreeMemory),
            b"vkBindBufferMemory" => void_fn!(bind_buffer_memory, vk::PFN_vkBindBufferMemory),
            b"vkBindImageMemory" => void_fn!(bind_image_memory, vk::PFN_vkBindImageMemory),
            b"vkQueuePresentKHR" => void_fn!(queue_present_khr, vk::PFN_vkQueuePresentKHR),
            _ => None,
        }
    }
}

/// Whether the layer implements `name` itself.
pub fn is_intercepted(name: &str) -> bool {
    instance_function(name.as_bytes()).is_some()
}

// =============================================================================
// Exported
// =============================================================================

/// # Safety
///
/// Called by the loader with a valid negotiation struct.
#[no_mangle]
pub unsafe extern "system" fn vkNegotiateLoaderLayerInterfaceVersion(
    p_version_struct: *mut NegotiateLayerInterface,
) -> vk::Result {
    let Some(negotiate) = p_version_struct.as_mut() else {
        diagnostics::emit_with_context(&VMI003, "vkNegotiateLoaderLayerInterfaceVersion");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    if negotiate.s_type != NegotiateStructType::INTERFACE_STRUCT
        || negotiate.loader_layer_interface_version < LAYER_INTERFACE_VERSION
    {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    negotiate.loader_layer_interface_version = LAYER_INTERFACE_VERSION;
    negotiate.pfn_get_instance_proc_addr = Some(vkGetInstanceProcAddr);
    negotiate.pfn_get_device_proc_addr = Some(vkGetDeviceProcAddr);
    negotiate.pfn_get_physical_device_proc_addr = None;
    vk::Result::SUCCESS
}

/// # Safety
///
/// `p_name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "system" fn vkGetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    if let Some(function) = instance_function(CStr::from_ptr(p_name).to_bytes()) {
        return Some(function);
    }
    context::current().and_then(|context| context.next_instance_proc_addr(instance, p_name))
}

/// # Safety
///
/// `p_name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "system" fn vkGetDeviceProcAddr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    if let Some(function) = device_function(CStr::from_ptr(p_name).to_bytes()) {
        return Some(function);
    }
    context::current().and_then(|context| context.next_device_proc_addr(device, p_name))
}

// =============================================================================
// Resolved through the proc-addr functions
// =============================================================================

unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let layer = context::acquire();
    let result = layer.create_instance(p_create_info, p_allocator, p_instance);
    drop(layer);
    if result != vk::Result::SUCCESS {
        context::release();
    }
    result
}

unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let Some(layer) = context::current() else {
        if instance != vk::Instance::null() {
            diagnostics::emit_with_context(&VMI001, "vkDestroyInstance");
        }
        return;
    };
    let known = layer.destroy_instance(instance, p_allocator);
    drop(layer);
    if known {
        context::release();
    }
}

unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    match context::current() {
        Some(layer) => layer.create_device(physical_device, p_create_info, p_allocator, p_device),
        None => {
            diagnostics::emit_with_context(&VMI001, "vkCreateDevice");
            vk::Result::ERROR_INITIALIZATION_FAILED
        }
    }
}

unsafe extern "system" fn destroy_device(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    match context::current() {
        Some(layer) => layer.destroy_device(device, p_allocator),
        None => diagnostics::emit_with_context(&VMI001, "vkDestroyDevice"),
    }
}

unsafe extern "system" fn allocate_memory(
    device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    match context::current() {
        Some(layer) => layer.allocate_memory(device, p_allocate_info, p_allocator, p_memory),
        None => no_context("vkAllocateMemory"),
    }
}

unsafe extern "system" fn free_memory(
    device: vk::Device,
    memory: vk::DeviceMemory,
    p_allocator: *const vk::AllocationCallbacks,
) {
    match context::current() {
        Some(layer) => layer.free_memory(device, memory, p_allocator),
        None => diagnostics::emit_with_context(&VMI001, "vkFreeMemory"),
    }
}

unsafe extern "system" fn bind_buffer_memory(
    device: vk::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    memory_offset: vk::DeviceSize,
) -> vk::Result {
    match context::current() {
        Some(layer) => layer.bind_buffer_memory(device, buffer, memory, memory_offset),
        None => no_context("vkBindBufferMemory"),
    }
}

unsafe extern "system" fn bind_image_memory(
    device: vk::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    memory_offset: vk::DeviceSize,
) -> vk::Result {
    match context::current() {
        Some(layer) => layer.bind_image_memory(device, image, memory, memory_offset),
        None => no_context("vkBindImageMemory"),
    }
}

unsafe extern "system" fn queue_present_khr(
    queue: vk::Queue,
    p_present_info: *const vk::PresentInfoKHR,
) -> vk::Result {
    match context::current() {
        Some(layer) => layer.queue_present_khr(queue, p_present_info),
        None => no_context("vkQueuePresentKHR"),
    }
}

fn no_context(function: &str) -> vk::Result {
    diagnostics::emit_with_context(&VMI001, function);
    vk::Result::ERROR_INVALID_EXTERNAL_HANDLE
}
