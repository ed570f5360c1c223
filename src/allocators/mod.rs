//! Host allocation interposition.
//!
//! - [`heap`]: the tracked allocator every driver host allocation lands in
//! - [`interposer`]: the substitute `VkAllocationCallbacks` handed down the chain

pub mod heap;
pub mod interposer;

pub use heap::{TrackedHeap, HOST_HEAP};
pub use interposer::LowerAllocation;
