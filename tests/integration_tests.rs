//! Integration tests for vkmem-inspector.
//!
//! Drives the exported entry points the way the loader would, against a fake
//! next layer. The layer context is process-wide, so tests run one at a time.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;

use ash::vk::{self, Handle};
use vkmem_inspector::layer::chain::{
    LayerDeviceCreateInfo, LayerDeviceLink, LayerDevicePayload, LayerFunction,
    LayerInstanceCreateInfo, LayerInstanceLink, LayerInstancePayload,
};
use vkmem_inspector::{
    layer_context, vkGetDeviceProcAddr, vkGetInstanceProcAddr, AllocationEvent, CollectingSink,
    EventType, LayerConfig, TelemetryEvent, HOST_HEAP,
};

// =============================================================================
// Fake next layer
// =============================================================================

/// Allocation size the fake driver refuses.
const REFUSED_SIZE: u64 = 0xBAD;

static NEXT_KEY: AtomicUsize = AtomicUsize::new(0x10_0000);
static REUSED_KEY: AtomicUsize = AtomicUsize::new(0);
static NEXT_MEMORY: AtomicU64 = AtomicU64::new(0x1000);
static FAIL_PRESENT: AtomicBool = AtomicBool::new(false);
static FORWARDED_ALLOCATES: AtomicUsize = AtomicUsize::new(0);
static FORWARDED_FREES: AtomicUsize = AtomicUsize::new(0);
static FORWARDED_PRESENTS: AtomicUsize = AtomicUsize::new(0);
static CREATE_DEVICE_INSTANCE: AtomicU64 = AtomicU64::new(0);

fn host_blocks() -> &'static Mutex<HashMap<u64, usize>> {
    static BLOCKS: OnceLock<Mutex<HashMap<u64, usize>>> = OnceLock::new();
    BLOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A dispatchable handle: a pointer to a word holding its loader key.
fn dispatchable(key: usize) -> u64 {
    Box::leak(Box::new(key)) as *mut usize as u64
}

fn fresh_key() -> usize {
    NEXT_KEY.fetch_add(0x10, Ordering::Relaxed)
}

/// Make the next created object carry `key`, as the loader does when it
/// recycles the dispatch word of a destroyed one.
fn reuse_key(key: usize) {
    REUSED_KEY.store(key, Ordering::SeqCst);
}

fn next_key() -> usize {
    match REUSED_KEY.swap(0, Ordering::SeqCst) {
        0 => fresh_key(),
        key => key,
    }
}

unsafe fn key_of(handle: u64) -> usize {
    *(handle as *const usize)
}

unsafe extern "system" fn marker_function() {}

fn marker() -> vk::PFN_vkVoidFunction {
    Some(marker_function)
}

unsafe extern "system" fn next_create_instance(
    _p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let handle = dispatchable(next_key());
    let callbacks = p_allocator.as_ref().expect("layer always interposes an allocator");
    let block = (callbacks.pfn_allocation.unwrap())(
        callbacks.p_user_data,
        64,
        16,
        vk::SystemAllocationScope::INSTANCE,
    );
    host_blocks().lock().unwrap().insert(handle, block as usize);
    *p_instance = vk::Instance::from_raw(handle);
    vk::Result::SUCCESS
}

unsafe extern "system" fn next_destroy_instance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    let block = host_blocks().lock().unwrap().remove(&instance.as_raw());
    if let (Some(block), Some(callbacks)) = (block, p_allocator.as_ref()) {
        (callbacks.pfn_free.unwrap())(callbacks.p_user_data, block as *mut c_void);
    }
}

unsafe extern "system" fn next_create_device(
    _physical_device: vk::PhysicalDevice,
    _p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    assert!(!p_allocator.is_null());
    *p_device = vk::Device::from_raw(dispatchable(next_key()));
    vk::Result::SUCCESS
}

unsafe extern "system" fn next_destroy_device(_: vk::Device, _: *const vk::AllocationCallbacks) {}

unsafe extern "system" fn next_allocate_memory(
    _device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo,
    _p_allocator: *const vk::AllocationCallbacks,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    FORWARDED_ALLOCATES.fetch_add(1, Ordering::SeqCst);
    if (*p_allocate_info).allocation_size == REFUSED_SIZE {
        return vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
    }
    *p_memory = vk::DeviceMemory::from_raw(NEXT_MEMORY.fetch_add(1, Ordering::SeqCst));
    vk::Result::SUCCESS
}

unsafe extern "system" fn next_free_memory(
    _: vk::Device,
    _: vk::DeviceMemory,
    _: *const vk::AllocationCallbacks,
) {
    FORWARDED_FREES.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "system" fn next_bind_buffer_memory(
    _: vk::Device,
    _: vk::Buffer,
    _: vk::DeviceMemory,
    _: vk::DeviceSize,
) -> vk::Result {
    vk::Result::SUCCESS
}

unsafe extern "system" fn next_bind_image_memory(
    _: vk::Device,
    _: vk::Image,
    _: vk::DeviceMemory,
    _: vk::DeviceSize,
) -> vk::Result {
    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
}

unsafe extern "system" fn next_queue_present(
    _: vk::Queue,
    _: *const vk::PresentInfoKHR,
) -> vk::Result {
    FORWARDED_PRESENTS.fetch_add(1, Ordering::SeqCst);
    if FAIL_PRESENT.load(Ordering::SeqCst) {
        vk::Result::ERROR_OUT_OF_DATE_KHR
    } else {
        vk::Result::SUCCESS
    }
}

macro_rules! void_fn {
    ($f:expr, $pfn:ty) => {
        Some(mem::transmute::<$pfn, unsafe extern "system" fn()>($f as $pfn))
    };
}

unsafe extern "system" fn next_get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkCreateInstance" => void_fn!(next_create_instance, vk::PFN_vkCreateInstance),
        b"vkDestroyInstance" => void_fn!(next_destroy_instance, vk::PFN_vkDestroyInstance),
        b"vkCreateDevice" => {
            CREATE_DEVICE_INSTANCE.store(instance.as_raw(), Ordering::SeqCst);
            void_fn!(next_create_device, vk::PFN_vkCreateDevice)
        }
        b"vkEnumeratePhysicalDevices" => marker(),
        _ => None,
    }
}

unsafe extern "system" fn next_get_device_proc_addr(
    _device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkDestroyDevice" => void_fn!(next_destroy_device, vk::PFN_vkDestroyDevice),
        b"vkAllocateMemory" => void_fn!(next_allocate_memory, vk::PFN_vkAllocateMemory),
        b"vkFreeMemory" => void_fn!(next_free_memory, vk::PFN_vkFreeMemory),
        b"vkBindBufferMemory" => void_fn!(next_bind_buffer_memory, vk::PFN_vkBindBufferMemory),
        b"vkBindImageMemory" => void_fn!(next_bind_image_memory, vk::PFN_vkBindImageMemory),
        b"vkQueuePresentKHR" => void_fn!(next_queue_present, vk::PFN_vkQueuePresentKHR),
        b"vkCreateBuffer" => marker(),
        _ => None,
    }
}

// =============================================================================
// Harness
// =============================================================================

fn serial() -> MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

fn name(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Resolve one of the layer's instance-level functions.
unsafe fn instance_fn<T: Copy>(instance: vk::Instance, function: &str) -> T {
    let name = name(function);
    let f = vkGetInstanceProcAddr(instance, name.as_ptr().cast())
        .unwrap_or_else(|| panic!("{} did not resolve", function));
    mem::transmute_copy(&f)
}

/// Resolve one of the layer's device-level functions.
unsafe fn device_fn<T: Copy>(device: vk::Device, function: &str) -> T {
    let name = name(function);
    let f = vkGetDeviceProcAddr(device, name.as_ptr().cast())
        .unwrap_or_else(|| panic!("{} did not resolve", function));
    mem::transmute_copy(&f)
}

/// Create an instance through the layer with a loader-style link chain.
unsafe fn create_instance() -> (vk::Result, vk::Instance) {
    let mut link = LayerInstanceLink {
        next: ptr::null_mut(),
        next_get_instance_proc_addr: Some(next_get_instance_proc_addr),
        next_get_physical_device_proc_addr: None,
    };
    let mut layer_info = LayerInstanceCreateInfo {
        s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
        p_next: ptr::null(),
        function: LayerFunction::LINK_INFO,
        u: LayerInstancePayload {
            layer_info: &mut link,
        },
    };
    let create_info = vk::InstanceCreateInfo {
        p_next: &mut layer_info as *mut _ as *const c_void,
        ..Default::default()
    };

    let create: vk::PFN_vkCreateInstance = instance_fn(vk::Instance::null(), "vkCreateInstance");
    let mut instance = vk::Instance::null();
    let result = create(&create_info, ptr::null(), &mut instance);
    (result, instance)
}

unsafe fn destroy_instance(instance: vk::Instance) {
    let destroy: vk::PFN_vkDestroyInstance = instance_fn(instance, "vkDestroyInstance");
    destroy(instance, ptr::null());
}

/// Create a device on `instance` with a loader-style link chain.
unsafe fn create_device(instance: vk::Instance) -> (vk::Result, vk::Device) {
    // Physical devices share their instance's key.
    let physical_device = vk::PhysicalDevice::from_raw(dispatchable(key_of(instance.as_raw())));

    let mut link = LayerDeviceLink {
        next: ptr::null_mut(),
        next_get_instance_proc_addr: Some(next_get_instance_proc_addr),
        next_get_device_proc_addr: Some(next_get_device_proc_addr),
    };
    let mut layer_info = LayerDeviceCreateInfo {
        s_type: vk::StructureType::LOADER_DEVICE_CREATE_INFO,
        p_next: ptr::null(),
        function: LayerFunction::LINK_INFO,
        u: LayerDevicePayload {
            layer_info: &mut link,
        },
    };
    let create_info = vk::DeviceCreateInfo {
        p_next: &mut layer_info as *mut _ as *const c_void,
        ..Default::default()
    };

    let create: vk::PFN_vkCreateDevice = instance_fn(instance, "vkCreateDevice");
    let mut device = vk::Device::null();
    let result = create(physical_device, &create_info, ptr::null(), &mut device);
    // The layer advanced the link past itself before calling down.
    assert!(layer_info.u.layer_info.is_null());
    (result, device)
}

unsafe fn destroy_device(device: vk::Device) {
    let destroy: vk::PFN_vkDestroyDevice = device_fn(device, "vkDestroyDevice");
    destroy(device, ptr::null());
}

/// One instance, one device and one queue created through the layer.
struct Harness {
    instance: vk::Instance,
    device: vk::Device,
    queue: vk::Queue,
    _serial: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(LayerConfig::in_memory().with_snapshot_interval(2))
    }

    fn with_config(config: LayerConfig) -> Self {
        let serial = serial();
        layer_context::configure(Some(config));
        FAIL_PRESENT.store(false, Ordering::SeqCst);

        unsafe {
            let (result, instance) = create_instance();
            assert_eq!(result, vk::Result::SUCCESS);

            let (result, device) = create_device(instance);
            assert_eq!(result, vk::Result::SUCCESS);

            // Queues share their device's key.
            let queue = vk::Queue::from_raw(dispatchable(key_of(device.as_raw())));

            let harness = Self {
                instance,
                device,
                queue,
                _serial: serial,
            };
            harness.drain();
            harness
        }
    }

    fn context(&self) -> Arc<vkmem_inspector::LayerContext> {
        layer_context::current().expect("context alive while an instance is")
    }

    fn drain(&self) -> Vec<TelemetryEvent> {
        self.context().drain_events()
    }

    fn allocation_events(&self) -> Vec<AllocationEvent> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::Allocation(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn allocate(&self, size: u64) -> (vk::Result, vk::DeviceMemory) {
        unsafe {
            let allocate: vk::PFN_vkAllocateMemory = device_fn(self.device, "vkAllocateMemory");
            let info = vk::MemoryAllocateInfo {
                allocation_size: size,
                memory_type_index: 1,
                ..Default::default()
            };
            let mut memory = vk::DeviceMemory::null();
            let result = allocate(self.device, &info, ptr::null(), &mut memory);
            (result, memory)
        }
    }

    fn free(&self, memory: vk::DeviceMemory) {
        unsafe {
            let free: vk::PFN_vkFreeMemory = device_fn(self.device, "vkFreeMemory");
            free(self.device, memory, ptr::null());
        }
    }

    fn present(&self) -> vk::Result {
        unsafe {
            let present: vk::PFN_vkQueuePresentKHR = device_fn(self.device, "vkQueuePresentKHR");
            let info = vk::PresentInfoKHR::default();
            present(self.queue, &info)
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        unsafe {
            destroy_device(self.device);
            destroy_instance(self.instance);
        }
        layer_context::configure(None);
    }
}

// =============================================================================
// Instance and device creation
// =============================================================================

#[test]
fn test_create_instance_with_valid_chain() {
    let _serial = serial();
    layer_context::configure(Some(LayerConfig::in_memory()));

    unsafe {
        let (result, instance) = create_instance();
        assert_eq!(result, vk::Result::SUCCESS);
        assert_ne!(instance, vk::Instance::null());
        assert_eq!(layer_context::live_instances(), 1);

        destroy_instance(instance);
    }
    assert!(layer_context::current().is_none());
    layer_context::configure(None);
}

#[test]
fn test_create_instance_without_link_fails() {
    let _serial = serial();
    layer_context::configure(Some(LayerConfig::in_memory()));
    let collector = Arc::new(CollectingSink::new());
    let previous = vkmem_inspector::diagnostics::install_sink(Some(collector.clone()));

    unsafe {
        let create: vk::PFN_vkCreateInstance =
            instance_fn(vk::Instance::null(), "vkCreateInstance");
        let create_info = vk::InstanceCreateInfo::default();
        let mut instance = vk::Instance::null();

        let result = create(&create_info, ptr::null(), &mut instance);
        assert_eq!(result, vk::Result::ERROR_INITIALIZATION_FAILED);
        assert_eq!(instance, vk::Instance::null());

        let result = create(ptr::null(), ptr::null(), &mut instance);
        assert_eq!(result, vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    vkmem_inspector::diagnostics::install_sink(previous);
    assert!(collector.contains("VMI002"));
    assert!(collector.contains("VMI003"));
    assert!(layer_context::current().is_none());
    assert_eq!(layer_context::live_instances(), 0);
    layer_context::configure(None);
}

#[test]
fn test_device_creation_resolves_through_owning_instance() {
    let harness = Harness::new();
    assert_eq!(
        CREATE_DEVICE_INSTANCE.load(Ordering::SeqCst),
        harness.instance.as_raw()
    );
    let context = harness.context();
    assert_eq!(context.registry().instance_count(), 1);
    assert_eq!(context.registry().device_count(), 1);
}

#[test]
fn test_host_allocations_go_through_tracked_heap() {
    let _serial = serial();
    layer_context::configure(Some(LayerConfig::in_memory()));

    let before = HOST_HEAP.stats();
    unsafe {
        let (result, instance) = create_instance();
        assert_eq!(result, vk::Result::SUCCESS);
        let during = HOST_HEAP.stats();
        assert_eq!(during.allocation_count, before.allocation_count + 1);

        // The fake driver frees its block with the callbacks it is given on
        // destroy; the layer hands down the substitutes again.
        destroy_instance(instance);
    }
    let after = HOST_HEAP.stats();
    assert_eq!(after.free_count, before.free_count + 1);
    layer_context::configure(None);
}

#[test]
fn test_device_recreated_on_reused_key() {
    let mut harness = Harness::new();
    let collector = Arc::new(CollectingSink::new());
    let previous = vkmem_inspector::diagnostics::install_sink(Some(collector.clone()));

    unsafe {
        let key = key_of(harness.device.as_raw());
        destroy_device(harness.device);

        reuse_key(key);
        let (result, device) = create_device(harness.instance);
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(key_of(device.as_raw()), key);
        harness.device = device;
    }
    vkmem_inspector::diagnostics::install_sink(previous);

    assert!(collector.contains("VMI102"));
    assert!(!collector.has_errors());
    assert_eq!(harness.context().registry().device_count(), 1);

    // The new device's calls reach the fake driver through the new table.
    let forwarded = FORWARDED_ALLOCATES.load(Ordering::SeqCst);
    let (result, memory) = harness.allocate(4096);
    assert_eq!(result, vk::Result::SUCCESS);
    assert_eq!(FORWARDED_ALLOCATES.load(Ordering::SeqCst), forwarded + 1);
    harness.free(memory);
    assert_eq!(harness.allocation_events().len(), 2);
}

#[test]
fn test_instance_recreated_on_reused_key() {
    let _serial = serial();
    layer_context::configure(Some(LayerConfig::in_memory()));

    unsafe {
        let (_, first) = create_instance();
        let (_, second) = create_instance();
        let key = key_of(first.as_raw());

        // The second instance keeps the context and its registry alive.
        destroy_instance(first);
        assert_eq!(layer_context::live_instances(), 1);

        reuse_key(key);
        let (result, third) = create_instance();
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(key_of(third.as_raw()), key);
        assert_eq!(layer_context::live_instances(), 2);
        assert_eq!(
            layer_context::current().unwrap().registry().instance_count(),
            2
        );

        // Devices created on the new instance resolve through its table.
        let (result, device) = create_device(third);
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(CREATE_DEVICE_INSTANCE.load(Ordering::SeqCst), third.as_raw());
        destroy_device(device);

        // The fake driver frees its host block through the callbacks it was
        // handed at create time; they must still be live.
        let frees = HOST_HEAP.stats().free_count;
        destroy_instance(third);
        assert_eq!(HOST_HEAP.stats().free_count, frees + 1);

        destroy_instance(second);
    }
    assert!(layer_context::current().is_none());
    layer_context::configure(None);
}

// =============================================================================
// Proc-addr resolution
// =============================================================================

#[test]
fn test_own_functions_resolve_and_others_delegate() {
    let harness = Harness::new();

    unsafe {
        let by_null = vkGetInstanceProcAddr(
            vk::Instance::null(),
            b"vkAllocateMemory\0".as_ptr().cast(),
        );
        let by_instance =
            vkGetInstanceProcAddr(harness.instance, b"vkAllocateMemory\0".as_ptr().cast());
        assert!(by_null.is_some());
        assert_eq!(by_null.map(|f| f as usize), by_instance.map(|f| f as usize));

        let delegated = vkGetInstanceProcAddr(
            harness.instance,
            b"vkEnumeratePhysicalDevices\0".as_ptr().cast(),
        );
        assert_eq!(delegated.map(|f| f as usize), marker().map(|f| f as usize));

        let delegated =
            vkGetDeviceProcAddr(harness.device, b"vkCreateBuffer\0".as_ptr().cast());
        assert_eq!(delegated.map(|f| f as usize), marker().map(|f| f as usize));

        let unknown_to_next =
            vkGetDeviceProcAddr(harness.device, b"vkCmdDraw\0".as_ptr().cast());
        assert!(unknown_to_next.is_none());
    }
}

#[test]
fn test_null_scope_resolves_only_own_functions() {
    let harness = Harness::new();

    unsafe {
        assert!(vkGetInstanceProcAddr(
            vk::Instance::null(),
            b"vkEnumeratePhysicalDevices\0".as_ptr().cast()
        )
        .is_none());
        assert!(
            vkGetDeviceProcAddr(vk::Device::null(), b"vkCreateBuffer\0".as_ptr().cast())
                .is_none()
        );
        assert!(vkGetDeviceProcAddr(
            vk::Device::null(),
            b"vkQueuePresentKHR\0".as_ptr().cast()
        )
        .is_some());
    }
    drop(harness);
}

// =============================================================================
// Memory events
// =============================================================================

#[test]
fn test_allocation_deltas_in_call_order() {
    let harness = Harness::new();

    let (first, _) = harness.allocate(1024);
    let (second, _) = harness.allocate(2048);
    assert_eq!(first, vk::Result::SUCCESS);
    assert_eq!(second, vk::Result::SUCCESS);

    let events = harness.allocation_events();
    let deltas: Vec<i64> = events.iter().map(|e| e.memory_delta).collect();
    assert_eq!(deltas, vec![1024, 2048]);

    for event in &events {
        assert_eq!(event.function_name, "vkAllocateMemory");
        assert_eq!(event.event_type, EventType::Allocation);
        assert_eq!(event.result_code, 0);
        assert_eq!(event.frame_index, 0);
    }

    let parameters: serde_json::Value = serde_json::from_str(&events[1].parameters).unwrap();
    assert_eq!(parameters["allocationSize"], 2048);
    assert_eq!(parameters["memoryTypeIndex"], 1);
}

#[test]
fn test_failed_allocation_records_zero_delta() {
    let harness = Harness::new();

    let (result, _) = harness.allocate(REFUSED_SIZE);
    assert_eq!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

    let events = harness.allocation_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].memory_delta, 0);
    assert_eq!(
        events[0].result_code,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.as_raw()
    );
    assert_eq!(harness.context().memory_stats().allocation_count, 0);
}

#[test]
fn test_allocate_free_pairs_per_thread() {
    let harness = Harness::new();
    let device = harness.device;

    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let device = device.as_raw();
            thread::spawn(move || unsafe {
                let device = vk::Device::from_raw(device);
                let allocate: vk::PFN_vkAllocateMemory = device_fn(device, "vkAllocateMemory");
                let free: vk::PFN_vkFreeMemory = device_fn(device, "vkFreeMemory");
                for i in 0..10u64 {
                    let info = vk::MemoryAllocateInfo {
                        allocation_size: 256 * (t + 1) + i,
                        ..Default::default()
                    };
                    let mut memory = vk::DeviceMemory::null();
                    assert_eq!(
                        allocate(device, &info, ptr::null(), &mut memory),
                        vk::Result::SUCCESS
                    );
                    free(device, memory, ptr::null());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut by_thread: HashMap<u64, Vec<AllocationEvent>> = HashMap::new();
    for event in harness.allocation_events() {
        by_thread.entry(event.thread_id).or_default().push(event);
    }

    assert_eq!(by_thread.len(), 4);
    for events in by_thread.values() {
        assert_eq!(events.len(), 20);
        for pair in events.chunks(2) {
            assert_eq!(pair[0].event_type, EventType::Allocation);
            assert_eq!(pair[1].event_type, EventType::Free);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    let stats = harness.context().memory_stats();
    assert_eq!(stats.allocation_count, 40);
    assert_eq!(stats.deallocation_count, 40);
    assert_eq!(stats.total_allocated, 0);
}

#[test]
fn test_free_of_unknown_handle_forwards_and_records() {
    let harness = Harness::new();
    let forwarded = FORWARDED_FREES.load(Ordering::SeqCst);

    harness.free(vk::DeviceMemory::from_raw(0x9999_9999));

    assert_eq!(FORWARDED_FREES.load(Ordering::SeqCst), forwarded + 1);
    let events = harness.drain();
    assert_eq!(events.len(), 1);
    let free = events[0].as_allocation().unwrap();
    assert_eq!(free.event_type, EventType::Free);
    assert_eq!(free.memory_delta, 0);
    assert_eq!(free.result_code, 0);
    assert_eq!(free.parameters, r#"{"memory":2576980377}"#);
}

#[test]
fn test_free_of_known_handle_completes_usage_record() {
    let harness = Harness::new();
    let (_, memory) = harness.allocate(4096);
    harness.present();
    harness.free(memory);

    let events = harness.drain();
    let usage = events
        .iter()
        .find_map(|event| match event {
            TelemetryEvent::MemoryUsage(record) => Some(*record),
            _ => None,
        })
        .expect("usage record emitted on free");

    assert_eq!(usage.device_memory, memory.as_raw());
    assert_eq!(usage.allocation_size, 4096);
    assert_eq!(usage.frame_allocated, 0);
    assert_eq!(usage.frame_deallocated, 1);
}

#[test]
fn test_bind_events() {
    let harness = Harness::new();
    let (_, memory) = harness.allocate(64);
    harness.drain();

    unsafe {
        let bind_buffer: vk::PFN_vkBindBufferMemory =
            device_fn(harness.device, "vkBindBufferMemory");
        let bind_image: vk::PFN_vkBindImageMemory = device_fn(harness.device, "vkBindImageMemory");

        let buffer = vk::Buffer::from_raw(0xB0);
        let image = vk::Image::from_raw(0x1A);
        assert_eq!(
            bind_buffer(harness.device, buffer, memory, 16),
            vk::Result::SUCCESS
        );
        // The fake driver fails image binds; the result is forwarded.
        assert_eq!(
            bind_image(harness.device, image, memory, 0),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        );
    }

    let events = harness.allocation_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == EventType::Binding));
    assert!(events.iter().all(|e| e.memory_delta == 0));
    assert_eq!(events[0].function_name, "vkBindBufferMemory");
    assert_eq!(events[1].function_name, "vkBindImageMemory");
    assert_eq!(
        events[1].result_code,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.as_raw()
    );

    let parameters: serde_json::Value = serde_json::from_str(&events[0].parameters).unwrap();
    assert_eq!(parameters["buffer"], 0xB0);
    assert_eq!(parameters["offset"], 16);
}

// =============================================================================
// Presentation
// =============================================================================

#[test]
fn test_present_advances_frame_regardless_of_result() {
    let harness = Harness::new();
    let context = harness.context();

    assert_eq!(harness.present(), vk::Result::SUCCESS);
    FAIL_PRESENT.store(true, Ordering::SeqCst);
    assert_eq!(harness.present(), vk::Result::ERROR_OUT_OF_DATE_KHR);
    FAIL_PRESENT.store(false, Ordering::SeqCst);
    assert_eq!(harness.present(), vk::Result::SUCCESS);

    assert_eq!(context.frames().current(), 3);

    let frames: Vec<u64> = harness
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            TelemetryEvent::Frame(frame) => Some(frame.frame_index),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![0, 1, 2]);
}

#[test]
fn test_concurrent_presents_get_distinct_frame_indices() {
    let harness = Harness::new();

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..25 {
                    assert_eq!(harness.present(), vk::Result::SUCCESS);
                }
            });
        }
    });

    assert_eq!(harness.context().frames().current(), 100);

    let events = harness.drain();
    let mut frames: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            TelemetryEvent::Frame(frame) => Some(frame.frame_index),
            _ => None,
        })
        .collect();
    frames.sort_unstable();
    assert_eq!(frames, (0..100).collect::<Vec<_>>());

    let snapshots = events
        .iter()
        .filter(|event| matches!(event, TelemetryEvent::Snapshot(_)))
        .count();
    assert_eq!(snapshots, 50);
}

#[test]
fn test_allocations_stamped_with_current_frame() {
    let harness = Harness::new();
    harness.present();
    harness.present();
    harness.allocate(8);

    let events = harness.allocation_events();
    assert_eq!(events[0].frame_index, 2);
}

#[test]
fn test_snapshot_every_interval() {
    let harness = Harness::new();
    harness.allocate(512);
    for _ in 0..4 {
        harness.present();
    }

    let events = harness.drain();
    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            TelemetryEvent::Snapshot(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].total_allocated, 512);
    assert_eq!(snapshots[0].allocation_count, 1);

    // A snapshot follows the frame event that triggered it.
    let tags: Vec<u8> = events.iter().map(TelemetryEvent::tag).collect();
    assert_eq!(tags, vec![1, 3, 3, 4, 3, 3, 4]);
}

// =============================================================================
// Unknown handles
// =============================================================================

#[test]
fn test_unknown_device_calls_fail_without_events() {
    let harness = Harness::new();
    let collector = Arc::new(CollectingSink::new());
    let previous = vkmem_inspector::diagnostics::install_sink(Some(collector.clone()));

    let stranger = vk::Device::from_raw(dispatchable(fresh_key()));
    let stranger_queue = vk::Queue::from_raw(dispatchable(fresh_key()));
    let allocates = FORWARDED_ALLOCATES.load(Ordering::SeqCst);
    let presents = FORWARDED_PRESENTS.load(Ordering::SeqCst);

    unsafe {
        let allocate: vk::PFN_vkAllocateMemory = device_fn(stranger, "vkAllocateMemory");
        let free: vk::PFN_vkFreeMemory = device_fn(stranger, "vkFreeMemory");
        let bind: vk::PFN_vkBindBufferMemory = device_fn(stranger, "vkBindBufferMemory");
        let present: vk::PFN_vkQueuePresentKHR = device_fn(stranger, "vkQueuePresentKHR");

        let info = vk::MemoryAllocateInfo {
            allocation_size: 16,
            ..Default::default()
        };
        let mut memory = vk::DeviceMemory::null();
        assert_eq!(
            allocate(stranger, &info, ptr::null(), &mut memory),
            vk::Result::ERROR_INVALID_EXTERNAL_HANDLE
        );
        free(stranger, vk::DeviceMemory::from_raw(1), ptr::null());
        assert_eq!(
            bind(stranger, vk::Buffer::null(), vk::DeviceMemory::null(), 0),
            vk::Result::ERROR_INVALID_EXTERNAL_HANDLE
        );
        let present_info = vk::PresentInfoKHR::default();
        assert_eq!(
            present(stranger_queue, &present_info),
            vk::Result::ERROR_INVALID_EXTERNAL_HANDLE
        );
    }

    vkmem_inspector::diagnostics::install_sink(previous);

    assert!(harness.drain().is_empty());
    assert_eq!(FORWARDED_ALLOCATES.load(Ordering::SeqCst), allocates);
    assert_eq!(FORWARDED_PRESENTS.load(Ordering::SeqCst), presents);
    assert_eq!(harness.context().frames().current(), 0);
    assert_eq!(collector.codes(), vec!["VMI001"; 4]);
}

// =============================================================================
// Context lifetime
// =============================================================================

#[test]
fn test_context_lives_until_last_instance() {
    let _serial = serial();
    layer_context::configure(Some(LayerConfig::in_memory()));

    unsafe {
        let (_, first) = create_instance();
        let (_, second) = create_instance();
        assert_eq!(layer_context::live_instances(), 2);
        let context = layer_context::current().unwrap();
        assert_eq!(context.registry().instance_count(), 2);
        drop(context);

        destroy_instance(first);
        assert!(layer_context::current().is_some());

        destroy_instance(second);
        assert!(layer_context::current().is_none());
        assert_eq!(layer_context::live_instances(), 0);

        // A new instance starts from an empty registry.
        let (result, third) = create_instance();
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(
            layer_context::current().unwrap().registry().instance_count(),
            1
        );
        destroy_instance(third);
    }
    layer_context::configure(None);
}

#[test]
fn test_destroy_null_instance_is_a_no_op() {
    let harness = Harness::new();
    unsafe {
        destroy_instance_unchecked(vk::Instance::null());
    }
    assert_eq!(layer_context::live_instances(), 1);
    drop(harness);
}

unsafe fn destroy_instance_unchecked(instance: vk::Instance) {
    let destroy: vk::PFN_vkDestroyInstance =
        instance_fn(vk::Instance::null(), "vkDestroyInstance");
    destroy(instance, ptr::null());
}
