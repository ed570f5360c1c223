//! Binary wire format of the telemetry stream.
//!
//! Each record is one frame: a little-endian `u32` body length followed by
//! the body. The body starts with a one-byte tag, then the record's fields in
//! declaration order. Integers are little-endian, strings are a `u32` byte
//! length followed by UTF-8.
//!
//! | Tag | Record              |
//! |-----|---------------------|
//! | 1   | `AllocationEvent`   |
//! | 2   | `MemoryUsageRecord` |
//! | 3   | `FrameInfo`         |
//! | 4   | `MemorySnapshot`    |

use std::fmt;
use std::io::{self, Read};

use super::event::{
    AllocationEvent, EventType, FrameInfo, MemorySnapshot, MemoryUsageRecord, TelemetryEvent,
};

const TAG_ALLOCATION: u8 = 1;
const TAG_MEMORY_USAGE: u8 = 2;
const TAG_FRAME: u8 = 3;
const TAG_SNAPSHOT: u8 = 4;

/// Size of the length prefix.
pub const PREFIX_LEN: usize = 4;

/// Frames larger than this are rejected instead of buffered.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A frame that could not be decoded.
#[derive(Debug)]
pub enum CodecError {
    /// Input ended inside a frame.
    Truncated { needed: usize, available: usize },
    /// The body's tag is not a known record type.
    UnknownTag(u8),
    /// A string field is not UTF-8.
    InvalidUtf8,
    /// An allocation event names an unknown event type.
    UnknownEventType(String),
    /// The body is longer than its record.
    TrailingBytes(usize),
    /// The declared length exceeds [`MAX_FRAME_LEN`].
    FrameTooLarge(usize),
    /// The underlying reader failed.
    Io(io::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated { needed, available } => write!(
                f,
                "truncated frame: needed {} bytes, {} available",
                needed, available
            ),
            CodecError::UnknownTag(tag) => write!(f, "unknown record tag {}", tag),
            CodecError::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            CodecError::UnknownEventType(name) => write!(f, "unknown event type '{}'", name),
            CodecError::TrailingBytes(n) => write!(f, "{} trailing bytes after record", n),
            CodecError::FrameTooLarge(len) => write!(f, "frame of {} bytes exceeds limit", len),
            CodecError::Io(err) => write!(f, "read failed: {}", err),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        CodecError::Io(err)
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode one record as a complete frame.
pub fn encode(event: &TelemetryEvent) -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    encode_into(event, &mut frame);
    frame
}

/// Append one complete frame to `out`.
pub fn encode_into(event: &TelemetryEvent, out: &mut Vec<u8>) {
    let start = out.len();
    out.extend_from_slice(&[0; PREFIX_LEN]);
    out.push(event.tag());

    match event {
        TelemetryEvent::Allocation(e) => {
            put_i64(out, e.timestamp);
            put_u64(out, e.frame_index);
            put_str(out, &e.function_name);
            put_str(out, e.event_type.as_str());
            put_i64(out, e.memory_delta);
            put_str(out, &e.parameters);
            out.extend_from_slice(&e.result_code.to_le_bytes());
            put_u64(out, e.thread_id);
        }
        TelemetryEvent::MemoryUsage(r) => {
            put_u64(out, r.device_memory);
            put_u64(out, r.frame_allocated);
            put_i64(out, r.allocated_at);
            put_u64(out, r.allocation_size);
            put_u64(out, r.frame_deallocated);
            put_i64(out, r.deallocated_at);
        }
        TelemetryEvent::Frame(f) => {
            put_u64(out, f.frame_index);
            put_i64(out, f.started_at);
        }
        TelemetryEvent::Snapshot(s) => {
            put_i64(out, s.timestamp);
            put_i64(out, s.total_allocated);
            put_u64(out, s.allocation_count);
            put_u64(out, s.deallocation_count);
        }
    }

    let body_len = (out.len() - start - PREFIX_LEN) as u32;
    out[start..start + PREFIX_LEN].copy_from_slice(&body_len.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the first frame of `bytes`.
///
/// Returns the record and the number of bytes the frame occupied.
pub fn decode(bytes: &[u8]) -> Result<(TelemetryEvent, usize), CodecError> {
    let mut prefix = Cursor::new(bytes);
    let body_len = prefix.u32()? as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body_len));
    }
    let body = prefix.take(body_len)?;
    Ok((decode_body(body)?, PREFIX_LEN + body_len))
}

/// Decode every frame in `bytes`.
pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<TelemetryEvent>, CodecError> {
    let mut events = Vec::new();
    while !bytes.is_empty() {
        let (event, used) = decode(bytes)?;
        events.push(event);
        bytes = &bytes[used..];
    }
    Ok(events)
}

/// Read one frame from a byte stream.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub fn read_event<R: Read>(reader: &mut R) -> Result<Option<TelemetryEvent>, CodecError> {
    let mut prefix = [0u8; PREFIX_LEN];
    let got = read_up_to(reader, &mut prefix)?;
    if got == 0 {
        return Ok(None);
    }
    if got < PREFIX_LEN {
        return Err(CodecError::Truncated {
            needed: PREFIX_LEN,
            available: got,
        });
    }

    let body_len = u32::from_le_bytes(prefix) as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body_len));
    }
    let mut body = vec![0u8; body_len];
    let got = read_up_to(reader, &mut body)?;
    if got < body_len {
        return Err(CodecError::Truncated {
            needed: body_len,
            available: got,
        });
    }
    decode_body(&body).map(Some)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn decode_body(body: &[u8]) -> Result<TelemetryEvent, CodecError> {
    let mut cur = Cursor::new(body);
    let tag = cur.u8()?;

    let event = match tag {
        TAG_ALLOCATION => {
            let timestamp = cur.i64()?;
            let frame_index = cur.u64()?;
            let function_name = cur.string()?;
            let type_name = cur.string()?;
            let event_type = EventType::parse(&type_name)
                .ok_or(CodecError::UnknownEventType(type_name))?;
            TelemetryEvent::Allocation(AllocationEvent {
                timestamp,
                frame_index,
                function_name,
                event_type,
                memory_delta: cur.i64()?,
                parameters: cur.string()?,
                result_code: cur.i32()?,
                thread_id: cur.u64()?,
            })
        }
        TAG_MEMORY_USAGE => TelemetryEvent::MemoryUsage(MemoryUsageRecord {
            device_memory: cur.u64()?,
            frame_allocated: cur.u64()?,
            allocated_at: cur.i64()?,
            allocation_size: cur.u64()?,
            frame_deallocated: cur.u64()?,
            deallocated_at: cur.i64()?,
        }),
        TAG_FRAME => TelemetryEvent::Frame(FrameInfo {
            frame_index: cur.u64()?,
            started_at: cur.i64()?,
        }),
        TAG_SNAPSHOT => TelemetryEvent::Snapshot(MemorySnapshot {
            timestamp: cur.i64()?,
            total_allocated: cur.i64()?,
            allocation_count: cur.u64()?,
            deallocation_count: cur.u64()?,
        }),
        other => return Err(CodecError::UnknownTag(other)),
    };

    match cur.remaining() {
        0 => Ok(event),
        n => Err(CodecError::TrailingBytes(n)),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() < n {
            return Err(CodecError::Truncated {
                needed: n,
                available: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        self.array().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        self.array().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        self.array().map(i64::from_le_bytes)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}
