//! Timestamps and thread identity for telemetry records.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static THREAD_ID: u64 = hash_thread_id();
}

/// Microseconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than a negative value.
pub fn timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Stable numeric identifier of the calling thread.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

fn hash_thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
