//! Escalating diagnostics to panics.
//!
//! CI runs can set `FRAMEGFX_STRICT=error` so that a leaked mapping or a
//! double free fails the run instead of scrolling past in the log.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;

use super::kind::DiagnosticKind;

/// Which diagnostics panic after being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StrictMode {
    /// Log only.
    #[default]
    Warn = 0,
    /// Errors panic.
    PanicOnError = 1,
    /// Errors and warnings panic.
    PanicOnWarning = 2,
}

impl StrictMode {
    /// Whether a diagnostic of `kind` panics under this mode.
    pub const fn is_fatal(self, kind: DiagnosticKind) -> bool {
        match kind {
            DiagnosticKind::Note => false,
            DiagnosticKind::Warning => matches!(self, Self::PanicOnWarning),
            DiagnosticKind::Error => !matches!(self, Self::Warn),
        }
    }

    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::PanicOnError,
            2 => Self::PanicOnWarning,
            _ => Self::Warn,
        }
    }
}

impl FromStr for StrictMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "off" | "warn" => Ok(Self::Warn),
            "1" | "error" => Ok(Self::PanicOnError),
            "2" | "warning" | "all" => Ok(Self::PanicOnWarning),
            other => Err(format!("unknown strict mode {:?}", other)),
        }
    }
}

static STRICT_MODE: AtomicU8 = AtomicU8::new(StrictMode::Warn as u8);

/// Set the process-wide strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// The process-wide strict mode.
pub fn strict_mode() -> StrictMode {
    StrictMode::from_bits(STRICT_MODE.load(Ordering::Relaxed))
}

/// Restores the previous strict mode when dropped.
#[must_use = "the previous mode is restored when the guard is dropped"]
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Switch to `mode` until the guard is dropped.
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

/// Read `FRAMEGFX_STRICT` once per process. Unknown values are logged and
/// leave the mode as is. Called when the first device is created.
pub fn init_from_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let Ok(value) = std::env::var("FRAMEGFX_STRICT") else {
            return;
        };
        match value.parse() {
            Ok(mode) => set_strict_mode(mode),
            Err(reason) => log::warn!("ignoring FRAMEGFX_STRICT: {}", reason),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("warn".parse(), Ok(StrictMode::Warn));
        assert_eq!(" ERROR ".parse(), Ok(StrictMode::PanicOnError));
        assert_eq!("2".parse(), Ok(StrictMode::PanicOnWarning));
        assert!("bogus".parse::<StrictMode>().is_err());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(!StrictMode::Warn.is_fatal(DiagnosticKind::Error));
        assert!(StrictMode::PanicOnError.is_fatal(DiagnosticKind::Error));
        assert!(!StrictMode::PanicOnError.is_fatal(DiagnosticKind::Warning));
        assert!(StrictMode::PanicOnWarning.is_fatal(DiagnosticKind::Warning));
        assert!(!StrictMode::PanicOnWarning.is_fatal(DiagnosticKind::Note));
    }

    #[test]
    fn test_guard_restores_mode() {
        let before = strict_mode();
        {
            let _guard = StrictModeGuard::new(StrictMode::Warn);
            assert_eq!(strict_mode(), StrictMode::Warn);
        }
        assert_eq!(strict_mode(), before);
    }
}
