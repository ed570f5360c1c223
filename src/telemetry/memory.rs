//! In-process telemetry sink.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use super::{SinkError, TelemetryEvent, TelemetrySink};

/// Lock-free queue of events.
///
/// Clones share the queue, so an embedder can keep one handle and drain what
/// the layer emitted through the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    queue: Arc<SegQueue<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued event, oldest first.
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        let mut events = Vec::with_capacity(self.queue.len());
        while let Some(event) = self.queue.pop() {
            events.push(event);
        }
        events
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl TelemetrySink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        self.queue.push(event.clone());
        Ok(())
    }
}
