//! Loader layer-link structures and the `pNext` chain walker.
//!
//! When the loader builds a layer chain it threads a
//! `VK_STRUCTURE_TYPE_LOADER_{INSTANCE,DEVICE}_CREATE_INFO` node into the
//! create-info's `pNext` chain. The node with function `VK_LAYER_LINK_INFO`
//! carries the next layer's proc-addr resolvers. A layer reads its entry,
//! advances the link past itself, and only then calls down, so that the next
//! layer finds its own entry at the head.
//!
//! These structures come from `vk_layer.h`, which is not part of the registry
//! `ash` is generated from, so they are declared here with C layout.

use std::ffi::{c_char, c_void};
use std::marker::PhantomData;

use ash::vk;

/// `VkLayerFunction`. Kept as an open newtype: the loader may send values
/// this crate does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LayerFunction(pub i32);

impl LayerFunction {
    pub const LINK_INFO: Self = Self(0);
    pub const LOADER_DATA_CALLBACK: Self = Self(1);
    pub const LOADER_LAYER_CREATE_DEVICE_CALLBACK: Self = Self(2);
    pub const LOADER_FEATURES: Self = Self(3);
}

#[allow(non_camel_case_types)]
pub type PFN_GetPhysicalDeviceProcAddr =
    unsafe extern "system" fn(instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction;

#[allow(non_camel_case_types)]
pub type PFN_vkSetInstanceLoaderData =
    unsafe extern "system" fn(instance: vk::Instance, object: *mut c_void) -> vk::Result;

#[allow(non_camel_case_types)]
pub type PFN_vkSetDeviceLoaderData =
    unsafe extern "system" fn(device: vk::Device, object: *mut c_void) -> vk::Result;

/// `VkLayerInstanceLink`
#[repr(C)]
#[derive(Debug)]
pub struct LayerInstanceLink {
    pub next: *mut LayerInstanceLink,
    pub next_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub next_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

/// `VkLayerDeviceLink`
#[repr(C)]
#[derive(Debug)]
pub struct LayerDeviceLink {
    pub next: *mut LayerDeviceLink,
    pub next_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub next_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
}

/// `layerDevice` member of the instance payload; opaque to this layer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LayerDeviceCallbacks {
    pub layer_create_device: *const c_void,
    pub layer_destroy_device: *const c_void,
}

/// Payload union of `VkLayerInstanceCreateInfo`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union LayerInstancePayload {
    pub layer_info: *mut LayerInstanceLink,
    pub set_instance_loader_data: Option<PFN_vkSetInstanceLoaderData>,
    pub layer_device: LayerDeviceCallbacks,
    pub loader_features: u32,
}

/// Payload union of `VkLayerDeviceCreateInfo`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union LayerDevicePayload {
    pub layer_info: *mut LayerDeviceLink,
    pub set_device_loader_data: Option<PFN_vkSetDeviceLoaderData>,
}

/// `VkLayerInstanceCreateInfo`
#[repr(C)]
pub struct LayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerInstancePayload,
}

/// `VkLayerDeviceCreateInfo`
#[repr(C)]
pub struct LayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerDevicePayload,
}

/// `VkNegotiateLayerStructType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct NegotiateStructType(pub i32);

impl NegotiateStructType {
    pub const UNINITIALIZED: Self = Self(0);
    pub const INTERFACE_STRUCT: Self = Self(1);
}

/// `VkNegotiateLayerInterface`, filled in by
/// `vkNegotiateLoaderLayerInterfaceVersion`.
#[repr(C)]
#[derive(Debug)]
pub struct NegotiateLayerInterface {
    pub s_type: NegotiateStructType,
    pub p_next: *mut c_void,
    pub loader_layer_interface_version: u32,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub pfn_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

/// Resolvers taken from an instance link node.
#[derive(Debug, Clone, Copy)]
pub struct NextInstanceLink {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
}

/// Resolvers taken from a device link node.
#[derive(Debug, Clone, Copy)]
pub struct NextDeviceLink {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

impl LayerInstanceCreateInfo {
    /// Read this layer's link entry and advance the chain past it.
    ///
    /// Returns `None` (leaving the chain untouched) when the node carries no
    /// link or the link has no resolver.
    ///
    /// # Safety
    ///
    /// `self.u.layer_info` must be the live link list the loader built.
    pub unsafe fn consume_link(&mut self) -> Option<NextInstanceLink> {
        let link = self.u.layer_info.as_ref()?;
        let get_instance_proc_addr = link.next_get_instance_proc_addr?;
        self.u.layer_info = link.next;
        Some(NextInstanceLink {
            get_instance_proc_addr,
        })
    }
}

impl LayerDeviceCreateInfo {
    /// Read this layer's link entry and advance the chain past it.
    ///
    /// # Safety
    ///
    /// `self.u.layer_info` must be the live link list the loader built.
    pub unsafe fn consume_link(&mut self) -> Option<NextDeviceLink> {
        let link = self.u.layer_info.as_ref()?;
        let get_instance_proc_addr = link.next_get_instance_proc_addr?;
        let get_device_proc_addr = link.next_get_device_proc_addr?;
        self.u.layer_info = link.next;
        Some(NextDeviceLink {
            get_instance_proc_addr,
            get_device_proc_addr,
        })
    }
}

/// One node of a `pNext` chain, classified by structure type.
pub enum ChainNode<'a> {
    LoaderInstance(&'a mut LayerInstanceCreateInfo),
    LoaderDevice(&'a mut LayerDeviceCreateInfo),
    Other(vk::StructureType),
}

impl<'a> ChainNode<'a> {
    /// # Safety
    ///
    /// `node` must point to a live structure starting with a
    /// `VkBaseInStructure` header whose `sType` matches its real type.
    unsafe fn classify(node: *const vk::BaseInStructure) -> Self {
        match (*node).s_type {
            vk::StructureType::LOADER_INSTANCE_CREATE_INFO => {
                ChainNode::LoaderInstance(&mut *(node as *mut LayerInstanceCreateInfo))
            }
            vk::StructureType::LOADER_DEVICE_CREATE_INFO => {
                ChainNode::LoaderDevice(&mut *(node as *mut LayerDeviceCreateInfo))
            }
            other => ChainNode::Other(other),
        }
    }
}

/// Iterator over a `pNext` chain.
pub struct ChainIter<'a> {
    next: *const vk::BaseInStructure,
    _chain: PhantomData<&'a mut ()>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = ChainNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: `walk` requires every node in the chain to be live and
        // correctly tagged
        unsafe {
            let node = self.next;
            self.next = (*node).p_next;
            Some(ChainNode::classify(node))
        }
    }
}

/// Walk the chain starting at `head` (a create-info's `pNext`).
///
/// The loader's chain is declared `const` but layers are required to update
/// their link entry in place, hence the mutable nodes.
///
/// # Safety
///
/// Every node must be a live, correctly tagged Vulkan structure, and nothing
/// else may access the chain while the returned nodes are in use.
pub unsafe fn walk<'a>(head: *const c_void) -> ChainIter<'a> {
    ChainIter {
        next: head as *const vk::BaseInStructure,
        _chain: PhantomData,
    }
}

/// A loader node type that can be picked out of a chain.
pub trait LinkNode: Sized {
    fn from_node<'a>(node: ChainNode<'a>) -> Option<&'a mut Self>;
    fn function(&self) -> LayerFunction;
}

impl LinkNode for LayerInstanceCreateInfo {
    fn from_node<'a>(node: ChainNode<'a>) -> Option<&'a mut Self> {
        match node {
            ChainNode::LoaderInstance(info) => Some(info),
            _ => None,
        }
    }

    fn function(&self) -> LayerFunction {
        self.function
    }
}

impl LinkNode for LayerDeviceCreateInfo {
    fn from_node<'a>(node: ChainNode<'a>) -> Option<&'a mut Self> {
        match node {
            ChainNode::LoaderDevice(info) => Some(info),
            _ => None,
        }
    }

    fn function(&self) -> LayerFunction {
        self.function
    }
}

/// Find the first node of type `N` carrying `function`.
///
/// # Safety
///
/// Same contract as [`walk`].
pub unsafe fn find_node<'a, N: LinkNode>(
    head: *const c_void,
    function: LayerFunction,
) -> Option<&'a mut N> {
    walk(head)
        .filter_map(N::from_node)
        .find(|node| node.function() == function)
}
