//! # vkmem-inspector
//!
//! A Vulkan layer that records where device and host memory goes.
//!
//! Loaded between an application and its driver, the layer forwards every
//! call unchanged and records:
//!
//! - `vkAllocateMemory` / `vkFreeMemory` with size, memory type and outcome
//! - `vkBindBufferMemory` / `vkBindImageMemory`
//! - one frame boundary per `vkQueuePresentKHR`
//! - the full lifetime of each `VkDeviceMemory` and periodic totals
//! - every host allocation the driver makes, through substitute
//!   `VkAllocationCallbacks`
//!
//! Records go to a viewer over TCP, to an embedded SQLite database, or to an
//! in-process queue; see [`telemetry`].
//!
//! ## Enabling the layer
//!
//! Add the directory holding `VkLayer_vkmem_inspector.json` to
//! `VK_ADD_IMPLICIT_LAYER_PATH` and set `ENABLE_VMI_LAYER=1`. The layer is
//! configured from `VMI_*` environment variables, see [`LayerConfig`].
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use vkmem_inspector::{layer_context, LayerConfig};
//!
//! // Keep events in process instead of reading the environment.
//! layer_context::configure(Some(LayerConfig::in_memory()));
//!
//! // ... create an instance with the layer enabled, render ...
//!
//! if let Some(context) = layer_context::current() {
//!     for event in context.drain_events() {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod api;
pub mod diagnostics;
pub mod layer;
pub mod telemetry;

pub mod allocators;
pub mod core;
mod sync;
mod util;

pub use crate::core::context as layer_context;

pub use api::config::{ConfigError, LayerConfig, TelemetryBackend, DEFAULT_STREAM_PORT};
pub use api::stats::{HostStats, MemoryStats};

pub use allocators::{LowerAllocation, TrackedHeap, HOST_HEAP};
pub use crate::core::{DispatchRegistry, FrameCounter, IdentityKey, LayerContext, RegistryError};

pub use telemetry::{
    AllocationEvent, CodecError, EventType, FrameInfo, MemorySink, MemorySnapshot,
    MemoryUsageRecord, SinkError, Telemetry, TelemetryEvent, TelemetrySink,
};

pub use layer::{
    vkGetDeviceProcAddr, vkGetInstanceProcAddr, vkNegotiateLoaderLayerInterfaceVersion,
};

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, CollectingSink};
pub use diagnostics::{StrictMode, set_strict_mode, StrictModeGuard};
pub use diagnostics::{
    VMI001, VMI002, VMI003, VMI004, VMI101, VMI102, VMI103, VMI201, VMI202, VMI301, VMI302,
    VMI901,
};
