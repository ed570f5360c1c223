//! Coded diagnostics for the layer.
//!
//! Every failure the layer resolves locally (a missing dispatch table, a
//! broken layer chain, a telemetry write that did not land) is reported here
//! instead of being propagated to the application.
//!
//! ## Diagnostic Codes
//!
//! | Code   | Meaning                          |
//! |--------|----------------------------------|
//! | VMI0xx | Contract violations              |
//! | VMI1xx | Dispatch table registration      |
//! | VMI2xx | Telemetry backend failures       |
//! | VMI3xx | Host allocator interposition     |
//! | VMI9xx | Configuration                    |
//!
//! Output goes to stderr in debug builds (or with the `diagnostics` feature)
//! and to the `log` crate with the `log` feature. Strict mode turns error
//! diagnostics into panics, see [`StrictMode`].

pub mod emit;
pub mod kind;
pub mod strict;

pub use emit::{
    emit, emit_with_context, install_sink, set_verbose, suppress_diagnostics, CollectingSink,
    DiagnosticSink,
};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

pub use kind::{
    VMI001, VMI002, VMI003, VMI004, VMI101, VMI102, VMI103, VMI201, VMI202, VMI301, VMI302,
    VMI901,
};
