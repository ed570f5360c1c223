//! Diagnostic kinds and predefined codes.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A broken contract or a lost record.
    Error,
    /// Something degraded but the call still went through.
    Warning,
    /// Informational.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "VMI001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a note diagnostic.
    pub const fn note(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Note,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// VMI0xx - Contract violations
// =============================================================================

/// VMI001: No dispatch table registered for a handle.
pub const VMI001: Diagnostic = Diagnostic::error(
    "VMI001",
    "could not find the dispatch table for this handle",
)
.with_note("the handle was not created through this layer, or the layer was torn down")
.with_help("make sure the layer is enabled before the instance and device are created");

/// VMI002: Layer link node missing from the create-info chain.
pub const VMI002: Diagnostic = Diagnostic::error(
    "VMI002",
    "could not find the loader layer link info in pCreateInfo->pNext",
)
.with_note("the loader inserts this node when it builds the layer chain")
.with_help("load the layer through the Vulkan loader rather than calling it directly");

/// VMI003: Required pointer argument was null.
pub const VMI003: Diagnostic = Diagnostic::error("VMI003", "required pointer argument is null");

/// VMI004: Next layer does not expose a required entry point.
pub const VMI004: Diagnostic = Diagnostic::error(
    "VMI004",
    "next layer returned a null pointer for a required entry point",
);

// =============================================================================
// VMI1xx - Registration
// =============================================================================

/// VMI101: Out of memory while registering a dispatch table.
pub const VMI101: Diagnostic = Diagnostic::error(
    "VMI101",
    "out of host memory while registering a dispatch table",
);

/// VMI102: Dispatch word reused by a new object.
pub const VMI102: Diagnostic = Diagnostic::note(
    "VMI102",
    "dispatch table replaced the stale entry of a destroyed object",
)
.with_note("the loader recycles dispatch words after vkDestroyInstance and vkDestroyDevice");

/// VMI103: Next layer's create call failed.
pub const VMI103: Diagnostic = Diagnostic::warning(
    "VMI103",
    "next layer failed the create call; result forwarded unchanged",
);

// =============================================================================
// VMI2xx - Telemetry
// =============================================================================

/// VMI201: Telemetry event could not be written.
pub const VMI201: Diagnostic = Diagnostic::error(
    "VMI201",
    "telemetry event could not be written to the backend",
)
.with_note("the intercepted call's own result is unaffected");

/// VMI202: Telemetry backend could not be opened.
pub const VMI202: Diagnostic = Diagnostic::warning(
    "VMI202",
    "telemetry backend could not be opened; events will be dropped",
)
.with_help("check VMI_TELEMETRY / VMI_ENDPOINT / VMI_DATABASE, and that the viewer is listening");

// =============================================================================
// VMI3xx - Host allocator
// =============================================================================

/// VMI301: Tracked host allocator returned null.
pub const VMI301: Diagnostic = Diagnostic::error(
    "VMI301",
    "tracked host allocator could not satisfy an allocation",
);

/// VMI302: Allocation callback invoked without its user data.
pub const VMI302: Diagnostic = Diagnostic::error(
    "VMI302",
    "allocation callback invoked with a null pUserData",
)
.with_note("falling back to the tracked host allocator");

// =============================================================================
// VMI9xx - Configuration
// =============================================================================

/// VMI901: Environment configuration value could not be parsed.
pub const VMI901: Diagnostic = Diagnostic::warning(
    "VMI901",
    "invalid layer configuration value, using the default",
);
