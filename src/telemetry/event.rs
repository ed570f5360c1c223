//! Telemetry record types.

use std::fmt;

use crate::util::time::{current_thread_id, timestamp_micros};

/// Kind of an [`AllocationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Allocation,
    Free,
    Binding,
}

impl EventType {
    /// Name stored in the `event_type` column and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Allocation => "allocation",
            EventType::Free => "free",
            EventType::Binding => "binding",
        }
    }

    /// Inverse of [`EventType::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "allocation" => Some(EventType::Allocation),
            "free" => Some(EventType::Free),
            "binding" => Some(EventType::Binding),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One intercepted memory call and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationEvent {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Frame the call happened in.
    pub frame_index: u64,
    /// Vulkan entry point, e.g. `vkAllocateMemory`.
    pub function_name: String,
    pub event_type: EventType,
    /// Bytes added by the call. Zero for failed allocations, frees and binds.
    pub memory_delta: i64,
    /// Call arguments as a JSON object.
    pub parameters: String,
    /// Raw `VkResult` of the forwarded call.
    pub result_code: i32,
    pub thread_id: u64,
}

impl AllocationEvent {
    /// Stamp a new event with the current time and calling thread.
    pub fn now(
        frame_index: u64,
        function_name: &str,
        event_type: EventType,
        memory_delta: i64,
        parameters: String,
        result_code: i32,
    ) -> Self {
        Self {
            timestamp: timestamp_micros(),
            frame_index,
            function_name: function_name.to_owned(),
            event_type,
            memory_delta,
            parameters,
            result_code,
            thread_id: current_thread_id(),
        }
    }
}

/// Full lifetime of one `VkDeviceMemory` allocation, emitted when it is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsageRecord {
    /// Raw `VkDeviceMemory` handle.
    pub device_memory: u64,
    pub frame_allocated: u64,
    pub allocated_at: i64,
    pub allocation_size: u64,
    pub frame_deallocated: u64,
    pub deallocated_at: i64,
}

/// Start of a frame, emitted on present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_index: u64,
    pub started_at: i64,
}

/// Periodic totals of device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub timestamp: i64,
    pub total_allocated: i64,
    pub allocation_count: u64,
    pub deallocation_count: u64,
}

/// Any record a sink accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    Allocation(AllocationEvent),
    MemoryUsage(MemoryUsageRecord),
    Frame(FrameInfo),
    Snapshot(MemorySnapshot),
}

impl TelemetryEvent {
    /// Wire tag of this record.
    pub fn tag(&self) -> u8 {
        match self {
            TelemetryEvent::Allocation(_) => 1,
            TelemetryEvent::MemoryUsage(_) => 2,
            TelemetryEvent::Frame(_) => 3,
            TelemetryEvent::Snapshot(_) => 4,
        }
    }

    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::Allocation(_) => "allocation event",
            TelemetryEvent::MemoryUsage(_) => "memory usage record",
            TelemetryEvent::Frame(_) => "frame info",
            TelemetryEvent::Snapshot(_) => "memory snapshot",
        }
    }

    /// Microsecond timestamp consumers order records by.
    pub fn timestamp(&self) -> i64 {
        match self {
            TelemetryEvent::Allocation(e) => e.timestamp,
            TelemetryEvent::MemoryUsage(r) => r.deallocated_at,
            TelemetryEvent::Frame(f) => f.started_at,
            TelemetryEvent::Snapshot(s) => s.timestamp,
        }
    }

    pub fn as_allocation(&self) -> Option<&AllocationEvent> {
        match self {
            TelemetryEvent::Allocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocationEvent> for TelemetryEvent {
    fn from(event: AllocationEvent) -> Self {
        TelemetryEvent::Allocation(event)
    }
}

impl From<MemoryUsageRecord> for TelemetryEvent {
    fn from(record: MemoryUsageRecord) -> Self {
        TelemetryEvent::MemoryUsage(record)
    }
}

impl From<FrameInfo> for TelemetryEvent {
    fn from(frame: FrameInfo) -> Self {
        TelemetryEvent::Frame(frame)
    }
}

impl From<MemorySnapshot> for TelemetryEvent {
    fn from(snapshot: MemorySnapshot) -> Self {
        TelemetryEvent::Snapshot(snapshot)
    }
}
