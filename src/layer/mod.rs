//! Vulkan layer plumbing: the loader's chain structures, the interception
//! methods and the exported entry points.

pub mod chain;
pub mod entry;
pub mod intercept;

pub use entry::{
    is_intercepted, vkGetDeviceProcAddr, vkGetInstanceProcAddr,
    vkNegotiateLoaderLayerInterfaceVersion, LAYER_INTERFACE_VERSION,
};
