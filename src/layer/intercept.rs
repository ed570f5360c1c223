//! Interception logic.
//!
//! Each method mirrors one Vulkan entry point: look up the next layer's
//! table, forward the call unchanged, then record what happened. Contract
//! violations (missing table, broken chain, null input) return a fixed error
//! code without calling down and without recording anything.

use std::ffi::c_char;
use std::mem;
use std::sync::Arc;

use ash::vk::{self, Handle};
use serde_json::json;

use super::chain::{self, LayerDeviceCreateInfo, LayerFunction, LayerInstanceCreateInfo};
use crate::allocators::LowerAllocation;
use crate::core::context::LayerContext;
use crate::core::dispatch::{DeviceDispatch, InstanceDispatch};
use crate::core::registry::{IdentityKey, RegistryError};
use crate::diagnostics::{self, VMI001, VMI002, VMI003, VMI004, VMI101, VMI102, VMI103};
use crate::telemetry::{AllocationEvent, EventType, FrameInfo};
use crate::util::time::timestamp_micros;

const VK_CREATE_INSTANCE: &[u8] = b"vkCreateInstance\0";
const VK_CREATE_DEVICE: &[u8] = b"vkCreateDevice\0";

fn cname(name: &'static [u8]) -> *const c_char {
    name.as_ptr() as *const c_char
}

/// Report a table that could not be registered.
///
/// The driver already holds the substitute host callbacks, so the table that
/// owns them is leaked rather than dropped.
fn report_registration<T>(table: Arc<T>, err: &RegistryError, what: &str) -> vk::Result {
    mem::forget(table);
    let diag = match err {
        RegistryError::OutOfMemory => &VMI101,
    };
    diagnostics::emit_with_context(diag, &format!("{}: {}", what, err));
    err.to_vk_result()
}

fn report_replaced(key: IdentityKey, what: &str) {
    diagnostics::emit_with_context(&VMI102, &format!("{}: key {}", what, key));
}

impl LayerContext {
    // =========================================================================
    // Instance
    // =========================================================================

    /// `vkCreateInstance`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkCreateInstance` contract, and the
    /// create-info's `pNext` chain must be the one the loader built.
    pub unsafe fn create_instance(
        &self,
        p_create_info: *const vk::InstanceCreateInfo,
        p_allocator: *const vk::AllocationCallbacks,
        p_instance: *mut vk::Instance,
    ) -> vk::Result {
        if p_create_info.is_null() || p_instance.is_null() {
            diagnostics::emit_with_context(&VMI003, "vkCreateInstance");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }

        let node = chain::find_node::<LayerInstanceCreateInfo>(
            (*p_create_info).p_next,
            LayerFunction::LINK_INFO,
        );
        let Some(next) = node.and_then(|node| node.consume_link()) else {
            diagnostics::emit_with_context(&VMI002, "vkCreateInstance");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };

        let Some(create) =
            (next.get_instance_proc_addr)(vk::Instance::null(), cname(VK_CREATE_INSTANCE))
        else {
            diagnostics::emit_with_context(&VMI004, "vkCreateInstance");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let create: vk::PFN_vkCreateInstance = mem::transmute(create);

        let lower = Box::new(LowerAllocation::from_raw(p_allocator));
        let callbacks = lower.callbacks();
        let result = create(p_create_info, &callbacks, p_instance);
        if result != vk::Result::SUCCESS {
            diagnostics::emit_with_context(&VMI103, &format!("vkCreateInstance: {}", result));
            return result;
        }

        let instance = *p_instance;
        let Some(key) = IdentityKey::from_handle(instance) else {
            diagnostics::emit_with_context(&VMI003, "vkCreateInstance returned a null instance");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let table = Arc::new(
            InstanceDispatch::load(instance, next.get_instance_proc_addr).with_allocation(lower),
        );

        match self.registry().add_instance_table(key, table.clone()) {
            Ok(replaced) => {
                if replaced.is_some() {
                    report_replaced(key, "vkCreateInstance");
                }
                #[cfg(feature = "log")]
                log::debug!("instance {:#x} registered under key {}", instance.as_raw(), key);
                vk::Result::SUCCESS
            }
            Err(err) => report_registration(table, &err, "vkCreateInstance"),
        }
    }

    /// `vkDestroyInstance`
    ///
    /// Forwards when the instance is known and returns whether it was.
    /// Releasing the context is up to the caller.
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkDestroyInstance` contract.
    pub unsafe fn destroy_instance(
        &self,
        instance: vk::Instance,
        p_allocator: *const vk::AllocationCallbacks,
    ) -> bool {
        if instance == vk::Instance::null() {
            return false;
        }
        let Some(table) = self.registry().instance_table_for(instance) else {
            diagnostics::emit_with_context(&VMI001, "vkDestroyInstance");
            return false;
        };
        let callbacks = table.allocation_callbacks();
        (table.core.destroy_instance)(instance, allocator_or(&callbacks, p_allocator));
        true
    }

    // =========================================================================
    // Device
    // =========================================================================

    /// `vkCreateDevice`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkCreateDevice` contract, and the
    /// create-info's `pNext` chain must be the one the loader built.
    pub unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        p_create_info: *const vk::DeviceCreateInfo,
        p_allocator: *const vk::AllocationCallbacks,
        p_device: *mut vk::Device,
    ) -> vk::Result {
        if p_create_info.is_null() || p_device.is_null() {
            diagnostics::emit_with_context(&VMI003, "vkCreateDevice");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        }

        let node = chain::find_node::<LayerDeviceCreateInfo>(
            (*p_create_info).p_next,
            LayerFunction::LINK_INFO,
        );
        let Some(next) = node.and_then(|node| node.consume_link()) else {
            diagnostics::emit_with_context(&VMI002, "vkCreateDevice");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };

        // Physical devices share their instance's key.
        let instance = self
            .registry()
            .instance_table_for(physical_device)
            .map_or(vk::Instance::null(), |table| table.instance);

        let Some(create) = (next.get_instance_proc_addr)(instance, cname(VK_CREATE_DEVICE)) else {
            diagnostics::emit_with_context(&VMI004, "vkCreateDevice");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let create: vk::PFN_vkCreateDevice = mem::transmute(create);

        let lower = Box::new(LowerAllocation::from_raw(p_allocator));
        let callbacks = lower.callbacks();
        let result = create(physical_device, p_create_info, &callbacks, p_device);
        if result != vk::Result::SUCCESS {
            diagnostics::emit_with_context(&VMI103, &format!("vkCreateDevice: {}", result));
            return result;
        }

        let device = *p_device;
        let Some(key) = IdentityKey::from_handle(device) else {
            diagnostics::emit_with_context(&VMI003, "vkCreateDevice returned a null device");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };
        let table = Arc::new(
            DeviceDispatch::load(device, next.get_instance_proc_addr, next.get_device_proc_addr)
                .with_allocation(lower),
        );

        match self.registry().add_device_table(key, table.clone()) {
            Ok(replaced) => {
                if replaced.is_some() {
                    report_replaced(key, "vkCreateDevice");
                }
                vk::Result::SUCCESS
            }
            Err(err) => report_registration(table, &err, "vkCreateDevice"),
        }
    }

    /// `vkDestroyDevice`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkDestroyDevice` contract.
    pub unsafe fn destroy_device(
        &self,
        device: vk::Device,
        p_allocator: *const vk::AllocationCallbacks,
    ) {
        if device == vk::Device::null() {
            return;
        }
        let Some(table) = self.registry().device_table_for(device) else {
            diagnostics::emit_with_context(&VMI001, "vkDestroyDevice");
            return;
        };
        let callbacks = table.allocation_callbacks();
        (table.core.destroy_device)(device, allocator_or(&callbacks, p_allocator));
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// `vkAllocateMemory`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkAllocateMemory` contract.
    pub unsafe fn allocate_memory(
        &self,
        device: vk::Device,
        p_allocate_info: *const vk::MemoryAllocateInfo,
        p_allocator: *const vk::AllocationCallbacks,
        p_memory: *mut vk::DeviceMemory,
    ) -> vk::Result {
        let Some(table) = self.device_table(device, "vkAllocateMemory") else {
            return vk::Result::ERROR_INVALID_EXTERNAL_HANDLE;
        };
        let Some(info) = p_allocate_info.as_ref() else {
            diagnostics::emit_with_context(&VMI003, "vkAllocateMemory: pAllocateInfo");
            return vk::Result::ERROR_INITIALIZATION_FAILED;
        };

        let result = (table.core.allocate_memory)(device, p_allocate_info, p_allocator, p_memory);

        let frame = self.frames().current();
        let succeeded = result == vk::Result::SUCCESS && !p_memory.is_null();
        if succeeded {
            self.tracker()
                .record_allocation((*p_memory).as_raw(), info.allocation_size, frame);
        }

        let parameters = json!({
            "allocationSize": info.allocation_size,
            "memoryTypeIndex": info.memory_type_index,
        });
        let delta = if succeeded {
            info.allocation_size as i64
        } else {
            0
        };
        self.telemetry().emit_event(AllocationEvent::now(
            frame,
            "vkAllocateMemory",
            EventType::Allocation,
            delta,
            parameters.to_string(),
            result.as_raw(),
        ));
        result
    }

    /// `vkFreeMemory`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkFreeMemory` contract.
    pub unsafe fn free_memory(
        &self,
        device: vk::Device,
        memory: vk::DeviceMemory,
        p_allocator: *const vk::AllocationCallbacks,
    ) {
        let Some(table) = self.device_table(device, "vkFreeMemory") else {
            return;
        };

        (table.core.free_memory)(device, memory, p_allocator);

        let frame = self.frames().current();
        let parameters = json!({ "memory": memory.as_raw() });
        self.telemetry().emit_event(AllocationEvent::now(
            frame,
            "vkFreeMemory",
            EventType::Free,
            0,
            parameters.to_string(),
            vk::Result::SUCCESS.as_raw(),
        ));

        if let Some(record) = self.tracker().record_free(memory.as_raw(), frame) {
            self.telemetry().emit_event(record);
        }
    }

    /// `vkBindBufferMemory`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkBindBufferMemory` contract.
    pub unsafe fn bind_buffer_memory(
        &self,
        device: vk::Device,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
    ) -> vk::Result {
        let Some(table) = self.device_table(device, "vkBindBufferMemory") else {
            return vk::Result::ERROR_INVALID_EXTERNAL_HANDLE;
        };

        let result = (table.core.bind_buffer_memory)(device, buffer, memory, memory_offset);

        let parameters = json!({
            "buffer": buffer.as_raw(),
            "memory": memory.as_raw(),
            "offset": memory_offset,
        });
        self.emit_binding("vkBindBufferMemory", parameters, result);
        result
    }

    /// `vkBindImageMemory`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkBindImageMemory` contract.
    pub unsafe fn bind_image_memory(
        &self,
        device: vk::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
    ) -> vk::Result {
        let Some(table) = self.device_table(device, "vkBindImageMemory") else {
            return vk::Result::ERROR_INVALID_EXTERNAL_HANDLE;
        };

        let result = (table.core.bind_image_memory)(device, image, memory, memory_offset);

        let parameters = json!({
            "image": image.as_raw(),
            "memory": memory.as_raw(),
            "offset": memory_offset,
        });
        self.emit_binding("vkBindImageMemory", parameters, result);
        result
    }

    fn emit_binding(&self, function: &str, parameters: serde_json::Value, result: vk::Result) {
        self.telemetry().emit_event(AllocationEvent::now(
            self.frames().current(),
            function,
            EventType::Binding,
            0,
            parameters.to_string(),
            result.as_raw(),
        ));
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    /// `vkQueuePresentKHR`
    ///
    /// The frame ends here whatever the present returned.
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the `vkQueuePresentKHR` contract.
    pub unsafe fn queue_present_khr(
        &self,
        queue: vk::Queue,
        p_present_info: *const vk::PresentInfoKHR,
    ) -> vk::Result {
        // Queues share their device's key.
        let Some(table) = self.device_table(queue, "vkQueuePresentKHR") else {
            return vk::Result::ERROR_INVALID_EXTERNAL_HANDLE;
        };

        let result = (table.swapchain.queue_present_khr)(queue, p_present_info);

        // Concurrent presents each get their own index from the advance.
        let frame = self.frames().advance();
        self.telemetry().emit_event(FrameInfo {
            frame_index: frame,
            started_at: timestamp_micros(),
        });

        let interval = self.config().snapshot_interval;
        if interval > 0 && (frame + 1) % interval == 0 {
            self.telemetry().emit_event(self.tracker().snapshot());
        }
        result
    }

    // =========================================================================
    // Proc-addr resolution
    // =========================================================================

    /// Ask the next layer for an instance-level function.
    ///
    /// Null when the instance is null or unknown.
    ///
    /// # Safety
    ///
    /// `name` must be a valid NUL-terminated string.
    pub unsafe fn next_instance_proc_addr(
        &self,
        instance: vk::Instance,
        name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        self.registry()
            .instance_table_for(instance)
            .and_then(|table| table.proc_addr(name))
    }

    /// Ask the next layer for a device-level function.
    ///
    /// Null when the device is null or unknown.
    ///
    /// # Safety
    ///
    /// `name` must be a valid NUL-terminated string.
    pub unsafe fn next_device_proc_addr(
        &self,
        device: vk::Device,
        name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        self.registry()
            .device_table_for(device)
            .and_then(|table| table.proc_addr(name))
    }

    /// Device table for a device-scoped handle, reporting VMI001 when absent.
    unsafe fn device_table<H: Handle>(
        &self,
        handle: H,
        function: &str,
    ) -> Option<Arc<DeviceDispatch>> {
        let table = self.registry().device_table_for(handle);
        if table.is_none() {
            diagnostics::emit_with_context(&VMI001, function);
        }
        table
    }
}

/// Destruction must use callbacks compatible with the ones used at creation,
/// which are the substitutes when the layer created the object.
fn allocator_or(
    substitute: &Option<vk::AllocationCallbacks>,
    fallback: *const vk::AllocationCallbacks,
) -> *const vk::AllocationCallbacks {
    substitute
        .as_ref()
        .map_or(fallback, |callbacks| callbacks as *const vk::AllocationCallbacks)
}
