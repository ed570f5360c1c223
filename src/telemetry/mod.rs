//! Telemetry capture and transmission.
//!
//! Every intercepted call ends in [`Telemetry::emit_event`]. The backend is
//! picked once, when the layer context is built, and sits behind the
//! [`TelemetrySink`] trait:
//!
//! | Backend   | Sink           | Feature  |
//! |-----------|----------------|----------|
//! | Stream    | [`StreamSink`] | `stream` |
//! | Store     | [`StoreSink`]  | `store`  |
//! | Memory    | [`MemorySink`] |          |
//! | Disabled  | [`NullSink`]   |          |
//!
//! Emission is synchronous and unbuffered. A failed write becomes a VMI201
//! diagnostic and never reaches the intercepted call's result.

pub mod codec;
pub mod event;
pub mod memory;
#[cfg(feature = "store")]
pub mod store;
#[cfg(feature = "stream")]
pub mod stream;

use std::fmt;
use std::io;

use crate::api::config::{LayerConfig, TelemetryBackend};
use crate::diagnostics::{self, VMI201, VMI202};

pub use codec::CodecError;
pub use event::{
    AllocationEvent, EventType, FrameInfo, MemorySnapshot, MemoryUsageRecord, TelemetryEvent,
};
pub use memory::MemorySink;
#[cfg(feature = "store")]
pub use store::StoreSink;
#[cfg(feature = "stream")]
pub use stream::StreamSink;

/// A backend that accepts telemetry records.
pub trait TelemetrySink: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Write one record synchronously.
    fn write(&self, event: &TelemetryEvent) -> Result<(), SinkError>;

    /// Push buffered bytes to the backend.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn write(&self, _event: &TelemetryEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Failure of a telemetry backend.
#[derive(Debug)]
pub enum SinkError {
    /// Socket or filesystem error.
    Io(io::Error),
    /// SQLite error.
    #[cfg(feature = "store")]
    Store(rusqlite::Error),
    /// The configured backend was compiled out.
    Unavailable(&'static str),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(err) => write!(f, "I/O error: {}", err),
            #[cfg(feature = "store")]
            SinkError::Store(err) => write!(f, "store error: {}", err),
            SinkError::Unavailable(backend) => {
                write!(f, "the '{}' backend is not compiled in", backend)
            }
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(err) => Some(err),
            #[cfg(feature = "store")]
            SinkError::Store(err) => Some(err),
            SinkError::Unavailable(_) => None,
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        SinkError::Io(err)
    }
}

#[cfg(feature = "store")]
impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Store(err)
    }
}

/// The layer's telemetry endpoint.
pub struct Telemetry {
    sink: Box<dyn TelemetrySink>,
    /// Second handle on the queue when the backend is in-memory.
    captured: Option<MemorySink>,
}

impl Telemetry {
    /// Wrap an arbitrary sink.
    pub fn new(sink: Box<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            captured: None,
        }
    }

    /// Telemetry that drops every event.
    pub fn disabled() -> Self {
        Self::new(Box::new(NullSink))
    }

    /// Telemetry that queues events in process.
    pub fn in_memory() -> Self {
        let sink = MemorySink::new();
        Self {
            sink: Box::new(sink.clone()),
            captured: Some(sink),
        }
    }

    /// Build the backend named by `config`.
    ///
    /// A backend that cannot be opened is reported as VMI202 and replaced by
    /// a disabled one; interception carries on without telemetry.
    pub fn from_config(config: &LayerConfig) -> Self {
        match Self::open(config) {
            Ok(telemetry) => {
                #[cfg(feature = "log")]
                log::debug!("telemetry backend: {}", telemetry.backend_name());
                telemetry
            }
            Err(err) => {
                diagnostics::emit_with_context(
                    &VMI202,
                    &format!("{:?} backend: {}", config.backend, err),
                );
                Self::disabled()
            }
        }
    }

    /// Like [`Telemetry::from_config`], but failures are returned.
    pub fn open(config: &LayerConfig) -> Result<Self, SinkError> {
        match config.backend {
            TelemetryBackend::Stream => open_stream(config),
            TelemetryBackend::Store => open_store(config),
            TelemetryBackend::Memory => Ok(Self::in_memory()),
            TelemetryBackend::Disabled => Ok(Self::disabled()),
        }
    }

    /// Emit one record.
    ///
    /// Never fails from the caller's point of view.
    pub fn emit_event<E: Into<TelemetryEvent>>(&self, event: E) {
        let event = event.into();
        if let Err(err) = self.sink.write(&event) {
            diagnostics::emit_with_context(
                &VMI201,
                &format!("{} to {} backend: {}", event.kind(), self.sink.name(), err),
            );
        }
    }

    /// Flush the backend, reporting failures as VMI201.
    pub fn flush(&self) {
        if let Err(err) = self.sink.flush() {
            diagnostics::emit_with_context(
                &VMI201,
                &format!("flush of {} backend: {}", self.sink.name(), err),
            );
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Drain queued events. Empty unless the backend is in-memory.
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        self.captured
            .as_ref()
            .map(MemorySink::drain)
            .unwrap_or_default()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.flush();
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("backend", &self.sink.name())
            .finish()
    }
}

#[cfg(feature = "stream")]
fn open_stream(config: &LayerConfig) -> Result<Telemetry, SinkError> {
    Ok(Telemetry::new(Box::new(StreamSink::connect(config.endpoint)?)))
}

#[cfg(not(feature = "stream"))]
fn open_stream(_config: &LayerConfig) -> Result<Telemetry, SinkError> {
    Err(SinkError::Unavailable("stream"))
}

#[cfg(feature = "store")]
fn open_store(config: &LayerConfig) -> Result<Telemetry, SinkError> {
    let path = config.resolved_database_path();
    Ok(Telemetry::new(Box::new(StoreSink::open(path)?)))
}

#[cfg(not(feature = "store"))]
fn open_store(_config: &LayerConfig) -> Result<Telemetry, SinkError> {
    Err(SinkError::Unavailable("store"))
}
