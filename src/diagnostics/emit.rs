//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` crate, or an
//! installed sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::{should_panic, should_panic_on_warning};
use crate::sync::mutex::Mutex;

/// Global flag to suppress stderr/log output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Global flag to enable verbose diagnostics.
static VERBOSE_DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

/// Extra sink receiving every diagnostic, suppressed or not.
static INSTALLED_SINK: OnceLock<Mutex<Option<Arc<dyn DiagnosticSink>>>> = OnceLock::new();

/// Suppress stderr and log output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Enable verbose diagnostic output.
pub fn set_verbose(verbose: bool) {
    VERBOSE_DIAGNOSTICS.store(verbose, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Install a sink that receives every diagnostic. Returns the previous one.
pub fn install_sink(sink: Option<Arc<dyn DiagnosticSink>>) -> Option<Arc<dyn DiagnosticSink>> {
    let slot = INSTALLED_SINK.get_or_init(|| Mutex::new(None));
    std::mem::replace(&mut *slot.lock(), sink)
}

/// Emit a diagnostic.
pub fn emit(diag: &Diagnostic) {
    dispatch(diag, None);
}

/// Emit a diagnostic with additional runtime context (a function name, a
/// handle value, an error message).
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    dispatch(diag, Some(context));
}

fn dispatch(diag: &Diagnostic, context: Option<&str>) {
    let sink = INSTALLED_SINK
        .get()
        .and_then(|slot| slot.lock().as_ref().cloned());
    if let Some(sink) = sink {
        sink.emit(diag, context);
    }

    if !is_suppressed() {
        #[cfg(any(debug_assertions, feature = "diagnostics"))]
        emit_to_stderr(diag, context);

        #[cfg(feature = "log")]
        emit_to_log(diag, context);
    }

    let fatal = match diag.kind {
        DiagnosticKind::Error => should_panic(),
        DiagnosticKind::Warning => should_panic_on_warning(),
        DiagnosticKind::Note => false,
    };
    if fatal {
        panic!(
            "[vkmem-inspector][{}] {}\nContext: {}\nStrict mode enabled - errors are fatal.",
            diag.code,
            diag.message,
            context.unwrap_or("-")
        );
    }
}

/// Internal: emit to stderr.
#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();
    let verbose = VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed);

    let _ = writeln!(
        stderr,
        "[vkmem-inspector][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );

    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }

    if verbose && diag.kind == DiagnosticKind::Error {
        #[cfg(feature = "debug")]
        {
            let _ = writeln!(stderr, "  backtrace:\n{:?}", backtrace::Backtrace::new());
        }
        #[cfg(not(feature = "debug"))]
        {
            let _ = writeln!(stderr, "  hint: enable the `debug` feature for a backtrace");
        }
    }
}

/// Internal: emit through the log crate.
#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("");
    match diag.kind {
        DiagnosticKind::Error => log::error!("[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Warning => log::warn!("[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Note => log::info!("[{}] {} {}", diag.code, diag.message, context),
    }
    if let Some(note) = diag.note {
        log::debug!("  note: {}", note);
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic.
    fn emit(&self, diag: &Diagnostic, context: Option<&str>);
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<(Diagnostic, Option<String>)>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codes of all collected diagnostics, in emission order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.diagnostics.lock().iter().map(|(d, _)| d.code).collect()
    }

    /// Whether a diagnostic with this code was collected.
    pub fn contains(&self, code: &str) -> bool {
        self.diagnostics.lock().iter().any(|(d, _)| d.code == code)
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }

    /// Check if any errors were collected.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .iter()
            .any(|(d, _)| d.kind == DiagnosticKind::Error)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, context: Option<&str>) {
        self.diagnostics
            .lock()
            .push((diag.clone(), context.map(str::to_owned)));
    }
}

/// Run `f` with a fresh [`CollectingSink`] installed, one caller at a time.
#[cfg(test)]
pub(crate) fn collect_diagnostics<R>(f: impl FnOnce() -> R) -> (R, Arc<CollectingSink>) {
    static SERIAL: Mutex<()> = Mutex::new(());
    let _serial = SERIAL.lock();

    let collector = Arc::new(CollectingSink::new());
    let previous = install_sink(Some(collector.clone()));
    let result = f();
    install_sink(previous);
    (result, collector)
}
