//! Layer state: dispatch registry, frame counter, memory tracker and the
//! context that owns them.

pub mod context;
pub mod dispatch;
pub mod frame;
pub mod registry;
pub mod tracker;

pub use context::LayerContext;
pub use dispatch::{DeviceDispatch, InstanceDispatch};
pub use frame::FrameCounter;
pub use registry::{DispatchRegistry, IdentityKey, RegistryError};
pub use tracker::MemoryTracker;
