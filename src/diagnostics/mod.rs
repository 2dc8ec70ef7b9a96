//! Runtime diagnostics.
//!
//! Misuse that cannot be reported through a `Result` (a mapping dropped
//! without unmap, a failed release inside `Drop`) is reported here instead.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | GX0xx | Memory blocks and regions      |
//! | GX1xx | Resources and mappings         |
//! | GX2xx | Contexts and frames            |
//! | GX9xx | Internal errors                |

pub mod emit;
pub mod kind;
pub mod macros;
pub mod strict;
pub(crate) mod tracy;

pub use emit::{
    add_sink, emit, emit_with_context, is_suppressed, remove_sink, suppress_diagnostics,
    CollectingSink, DiagnosticSink,
};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

pub use kind::{GX001, GX002, GX003, GX101, GX102, GX103, GX201, GX202, GX203, GX901};
