//! TCP stream sink.
//!
//! Connects once, at construction, and writes every event as one
//! length-prefixed frame (see [`codec`](super::codec)). There is no
//! acknowledgement and no reconnect: a failed write is reported and the
//! event is lost.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use super::codec;
use super::{SinkError, TelemetryEvent, TelemetrySink};
use crate::sync::mutex::Mutex;

/// Telemetry sink writing framed records to a viewer over TCP.
pub struct StreamSink {
    endpoint: SocketAddr,
    stream: Mutex<TcpStream>,
}

impl StreamSink {
    /// Connect to the viewer at `endpoint`.
    pub fn connect(endpoint: SocketAddr) -> Result<Self, SinkError> {
        let stream = TcpStream::connect(endpoint)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            endpoint,
            stream: Mutex::new(stream),
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }
}

impl TelemetrySink for StreamSink {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn write(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        let frame = codec::encode(event);
        // One lock per frame keeps frames from concurrent threads whole.
        let mut stream = self.stream.lock();
        stream.write_all(&frame)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.stream.lock().flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
