//! Embedded SQLite event store.
//!
//! Events are inserted synchronously on the calling thread, one statement per
//! event. Row ids come from named sequences (`seq_vulkan_event_id`,
//! `seq_memory_usage_id`) kept in a `sequences` table, so ids start at 1 and
//! stay dense per table.

use std::path::Path;

use rusqlite::{params, Connection};

use super::{
    AllocationEvent, FrameInfo, MemorySnapshot, MemoryUsageRecord, SinkError, TelemetryEvent,
    TelemetrySink,
};
use crate::sync::mutex::Mutex;

/// Path that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const SEQ_VULKAN_EVENT_ID: &str = "seq_vulkan_event_id";
const SEQ_MEMORY_USAGE_ID: &str = "seq_memory_usage_id";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO sequences (name, value) VALUES ('seq_vulkan_event_id', 0);
INSERT OR IGNORE INTO sequences (name, value) VALUES ('seq_memory_usage_id', 0);

CREATE TABLE IF NOT EXISTS vulkan_events (
    id INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    frame_number INTEGER NOT NULL,
    function_name TEXT NOT NULL,
    event_type TEXT,
    memory_delta INTEGER,
    parameters TEXT,
    result_code INTEGER,
    thread_id INTEGER
);

CREATE TABLE IF NOT EXISTS memory_usage (
    id INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    total_allocated INTEGER,
    allocation_count INTEGER,
    deallocation_count INTEGER
);

CREATE TABLE IF NOT EXISTS frame_information (
    frame_index INTEGER NOT NULL,
    started_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS device_memory_usage (
    device_memory INTEGER NOT NULL,
    frame_index_allocated INTEGER NOT NULL,
    allocated_at INTEGER NOT NULL,
    allocation_size INTEGER,
    frame_index_deallocated INTEGER,
    deallocated_at INTEGER
);
"#;

/// Telemetry sink backed by a SQLite database.
pub struct StoreSink {
    conn: Mutex<Connection>,
}

impl StoreSink {
    /// Open (or create) the database at `path` and provision the schema.
    ///
    /// `":memory:"` opens a private in-memory database. Missing parent
    /// directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)?
        };
        Self::with_connection(conn)
    }

    /// Provision the schema on an existing connection.
    pub fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against the underlying connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn insert_event(conn: &Connection, e: &AllocationEvent) -> rusqlite::Result<()> {
        let id = next_id(conn, SEQ_VULKAN_EVENT_ID)?;
        conn.prepare_cached(
            "INSERT INTO vulkan_events (id, timestamp, frame_number, function_name, event_type, \
             memory_delta, parameters, result_code, thread_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?
        .execute(params![
            id,
            e.timestamp,
            e.frame_index as i64,
            e.function_name,
            e.event_type.as_str(),
            e.memory_delta,
            e.parameters,
            e.result_code,
            e.thread_id as i64,
        ])?;
        Ok(())
    }

    fn insert_snapshot(conn: &Connection, s: &MemorySnapshot) -> rusqlite::Result<()> {
        let id = next_id(conn, SEQ_MEMORY_USAGE_ID)?;
        conn.prepare_cached(
            "INSERT INTO memory_usage (id, timestamp, total_allocated, allocation_count, \
             deallocation_count) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            id,
            s.timestamp,
            s.total_allocated,
            s.allocation_count as i64,
            s.deallocation_count as i64,
        ])?;
        Ok(())
    }

    fn insert_frame(conn: &Connection, f: &FrameInfo) -> rusqlite::Result<()> {
        conn.prepare_cached(
            "INSERT INTO frame_information (frame_index, started_at) VALUES (?1, ?2)",
        )?
        .execute(params![f.frame_index as i64, f.started_at])?;
        Ok(())
    }

    fn insert_usage(conn: &Connection, r: &MemoryUsageRecord) -> rusqlite::Result<()> {
        conn.prepare_cached(
            "INSERT INTO device_memory_usage (device_memory, frame_index_allocated, \
             allocated_at, allocation_size, frame_index_deallocated, deallocated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?
        .execute(params![
            r.device_memory as i64,
            r.frame_allocated as i64,
            r.allocated_at,
            r.allocation_size as i64,
            r.frame_deallocated as i64,
            r.deallocated_at,
        ])?;
        Ok(())
    }
}

/// Advance the named sequence and return its new value.
fn next_id(conn: &Connection, sequence: &str) -> rusqlite::Result<i64> {
    conn.prepare_cached("UPDATE sequences SET value = value + 1 WHERE name = ?1 RETURNING value")?
        .query_row([sequence], |row| row.get(0))
}

impl TelemetrySink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    fn write(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        let conn = self.conn.lock();
        match event {
            TelemetryEvent::Allocation(e) => Self::insert_event(&conn, e)?,
            TelemetryEvent::Snapshot(s) => Self::insert_snapshot(&conn, s)?,
            TelemetryEvent::Frame(f) => Self::insert_frame(&conn, f)?,
            TelemetryEvent::MemoryUsage(r) => Self::insert_usage(&conn, r)?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for StoreSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSink").finish_non_exhaustive()
    }
}
