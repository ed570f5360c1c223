//! Strict mode handling for diagnostics.
//!
//! In strict mode an error diagnostic panics after it is emitted. Inside an
//! `extern "system"` entry point that panic aborts the process, which is the
//! layer's equivalent of a failed assertion.

use std::sync::atomic::{AtomicU8, Ordering};

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StrictMode {
    /// Just report, don't panic.
    Warn = 0,
    /// Panic on errors.
    PanicOnError = 1,
    /// Panic on errors and warnings.
    PanicOnWarning = 2,
}

impl From<u8> for StrictMode {
    fn from(val: u8) -> Self {
        match val {
            1 => StrictMode::PanicOnError,
            2 => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

impl StrictMode {
    /// Parse the textual forms accepted by `VMI_STRICT`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "0" | "warn" | "false" | "off" => Some(StrictMode::Warn),
            "1" | "error" | "true" | "on" => Some(StrictMode::PanicOnError),
            "2" | "warning" | "all" => Some(StrictMode::PanicOnWarning),
            _ => None,
        }
    }
}

/// Global strict mode setting.
static STRICT_MODE: AtomicU8 = AtomicU8::new(0);

/// Set the strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Get the current strict mode.
pub fn strict_mode() -> StrictMode {
    StrictMode::from(STRICT_MODE.load(Ordering::Relaxed))
}

/// Check if we should panic for an error.
pub fn should_panic() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnError | StrictMode::PanicOnWarning)
}

/// Check if we should panic for a warning.
pub fn should_panic_on_warning() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnWarning)
}

/// RAII guard for temporarily setting strict mode.
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Create a new guard that sets strict mode.
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}
