//! Diagnostic kinds and the predefined diagnostic table.

/// Severity, which also picks the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Broken invariant or lost work.
    Error,
    /// Likely misuse that was recovered from.
    Warning,
    /// Informational.
    Note,
}

impl DiagnosticKind {
    /// Lowercase name, as printed before the code.
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
        }
    }
}

/// A predefined diagnostic. Instances live in `const`s named after their code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub kind: DiagnosticKind,
    /// Code such as `"GX101"`.
    pub code: &'static str,
    /// Main message.
    pub message: &'static str,
    /// Extra context.
    pub note: Option<&'static str>,
    /// Suggested fix.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a warning diagnostic.
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

    /// Attach an explanation.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Attach a suggested fix. Printed in debug builds only.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// GX0xx - Memory blocks and regions
// =============================================================================

/// GX001: Request larger than the block policy; a dedicated block was created.
pub const GX001: Diagnostic = Diagnostic::warning(
    "GX001",
    "allocation exceeds the configured block size, creating an oversized block"
).with_note("oversized blocks are only reused by requests that fit them")
 .with_help("raise the block size policy in AllocatorConfig for large resources");

/// GX002: A region could not be returned to its block.
pub const GX002: Diagnostic = Diagnostic::error(
    "GX002",
    "memory region could not be freed"
).with_note("the region was already free, or belongs to another block")
 .with_help("free each region exactly once, through the collection that allocated it");

/// GX003: Collection hit its block limit.
pub const GX003: Diagnostic = Diagnostic::warning(
    "GX003",
    "memory block collection reached its maximum block count"
).with_help("free resources, or raise maximum_blocks_per_collection");

// =============================================================================
// GX1xx - Resources and mappings
// =============================================================================

/// GX101: Mapping dropped without unmap.
pub const GX101: Diagnostic = Diagnostic::warning(
    "GX101",
    "mapped memory dropped without unmap or unmap_and_write"
).with_note("the memory was unmapped without flushing written ranges")
 .with_help("call unmap_and_write() after writing, or unmap() after reading");

/// GX102: Native handle release failed during disposal.
pub const GX102: Diagnostic = Diagnostic::error(
    "GX102",
    "failed to release a native handle during disposal"
).with_note("disposal cannot report errors; the handle may have leaked");

/// GX103: Resource disposed while a mapping is live.
pub const GX103: Diagnostic = Diagnostic::warning(
    "GX103",
    "resource disposed while mapped"
).with_note("the mapping was released with the resource; written ranges were not flushed");

// =============================================================================
// GX2xx - Contexts and frames
// =============================================================================

/// GX201: Context returned mid-frame.
pub const GX201: Diagnostic = Diagnostic::warning(
    "GX201",
    "render context returned while recording"
).with_note("the recorded commands were never submitted")
 .with_help("call end_frame() before returning the context");

/// GX202: Swapchain out of date during resize; recreated.
pub const GX202: Diagnostic = Diagnostic::note(
    "GX202",
    "swapchain out of date while a resize was pending, recreated once"
);

/// GX203: Device disposed while a render context is rented.
pub const GX203: Diagnostic = Diagnostic::warning(
    "GX203",
    "device disposed while a render context is rented"
).with_note("the context was released with the device");

// =============================================================================
// GX9xx - Internal
// =============================================================================

/// GX901: Internal error.
pub const GX901: Diagnostic = Diagnostic::error(
    "GX901",
    "internal graphics core error"
).with_note("this indicates a bug in framegfx");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_codes() {
        assert_eq!(GX101.kind, DiagnosticKind::Warning);
        assert_eq!(GX002.kind, DiagnosticKind::Error);
        assert!(GX001.help.is_some());
        assert_eq!(GX202.kind.prefix(), "note");
    }
}
