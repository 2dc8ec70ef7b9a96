//! Where diagnostics go.
//!
//! Every diagnostic is logged through `log` at a level matching its kind,
//! then handed to the registered sinks, then escalated if strict mode says
//! so.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::strict_mode;

static SINKS: Mutex<Vec<Arc<dyn DiagnosticSink>>> = Mutex::new(Vec::new());
static LOG_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Stop (or resume) logging diagnostics. Sinks and strict mode still apply.
pub fn suppress_diagnostics(suppress: bool) {
    LOG_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Whether diagnostics are kept out of the log.
pub fn is_suppressed() -> bool {
    LOG_SUPPRESSED.load(Ordering::Relaxed)
}

/// Receives emitted diagnostics, e.g. to surface them in an editor overlay.
pub trait DiagnosticSink: Send + Sync {
    /// Called once per emitted diagnostic. `context` names the object
    /// involved and may be empty.
    fn emit(&self, diag: &Diagnostic, context: &str);
}

/// Register `sink` for every diagnostic emitted from now on.
pub fn add_sink(sink: Arc<dyn DiagnosticSink>) {
    SINKS.lock().unwrap_or_else(PoisonError::into_inner).push(sink);
}

/// Unregister a sink added with [`add_sink`].
pub fn remove_sink(sink: &Arc<dyn DiagnosticSink>) {
    SINKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|registered| !Arc::ptr_eq(registered, sink));
}

/// Emit `diag` without context.
pub fn emit(diag: &Diagnostic) {
    emit_with_context(diag, "");
}

/// Emit `diag` about the object described by `context`.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    if !is_suppressed() {
        log_diagnostic(diag, context);
    }

    // Snapshot so a sink may register or remove sinks while handling.
    let sinks = SINKS.lock().unwrap_or_else(PoisonError::into_inner).clone();
    for sink in sinks {
        sink.emit(diag, context);
    }

    if strict_mode().is_fatal(diag.kind) {
        panic!("[{}] {} (strict mode: {:?})", diag.code, diag.message, strict_mode());
    }
}

fn log_diagnostic(diag: &Diagnostic, context: &str) {
    let level = match diag.kind {
        DiagnosticKind::Error => log::Level::Error,
        DiagnosticKind::Warning => log::Level::Warn,
        DiagnosticKind::Note => log::Level::Info,
    };
    if !log::log_enabled!(level) {
        return;
    }
    if context.is_empty() {
        log::log!(level, "[{}] {}", diag.code, diag.message);
    } else {
        log::log!(level, "[{}] {}: {}", diag.code, diag.message, context);
    }
    if let Some(note) = diag.note {
        log::log!(level, "  note: {}", note);
    }
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    if let Some(help) = diag.help {
        log::log!(level, "  help: {}", help);
    }
}

/// Sink that records `(code, context)` pairs. Useful in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(&'static str, String)>>,
}

impl CollectingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codes in emission order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.records().iter().map(|(code, _)| *code).collect()
    }

    /// Whether `code` was emitted with a context containing `needle`.
    pub fn saw(&self, code: &str, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|(seen, context)| *seen == code && context.contains(needle))
    }

    /// Remove and return everything recorded.
    pub fn take(&self) -> Vec<(&'static str, String)> {
        std::mem::take(&mut *self.records())
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Vec<(&'static str, String)>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, context: &str) {
        self.records().push((diag.code, context.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::kind::{GX001, GX202};

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.emit(&GX001, "memory type 2");
        sink.emit(&GX202, "");

        assert_eq!(sink.codes(), vec!["GX001", "GX202"]);
        assert!(sink.saw("GX001", "type 2"));
        assert!(!sink.saw("GX202", "type 2"));
        assert_eq!(sink.take().len(), 2);
        assert!(sink.codes().is_empty());
    }

    #[test]
    fn test_registered_sink_receives() {
        let sink = Arc::new(CollectingSink::new());
        let handle: Arc<dyn DiagnosticSink> = sink.clone();
        add_sink(handle.clone());
        emit_with_context(&GX202, "registered sink test");
        remove_sink(&handle);
        emit_with_context(&GX202, "after removal");

        assert!(sink.saw("GX202", "registered sink test"));
        assert!(!sink.saw("GX202", "after removal"));
    }

    #[test]
    fn test_suppressed_diagnostics_reach_sinks() {
        let sink = Arc::new(CollectingSink::new());
        let handle: Arc<dyn DiagnosticSink> = sink.clone();
        add_sink(handle.clone());
        suppress_diagnostics(true);
        emit_with_context(&GX202, "while suppressed");
        suppress_diagnostics(false);
        remove_sink(&handle);

        assert!(!is_suppressed());
        assert!(sink.saw("GX202", "while suppressed"));
    }
}
