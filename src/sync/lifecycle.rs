//! Tri-state disposal flag shared by every object that owns native handles.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{GraphicsError, Result};

const INITIALIZED: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Usable.
    Initialized,
    /// Native handles are being released.
    Disposing,
    /// Fully released.
    Disposed,
}

/// Atomic `Initialized -> Disposing -> Disposed` state.
///
/// Only the caller that wins [`begin_dispose`](Self::begin_dispose) releases
/// native handles; every later call observes a no-op.
#[derive(Debug)]
pub struct LifecycleState(AtomicU8);

impl LifecycleState {
    /// Create a state in `Initialized`.
    pub const fn new() -> Self {
        Self(AtomicU8::new(INITIALIZED))
    }

    /// Current state.
    pub fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            INITIALIZED => Lifecycle::Initialized,
            DISPOSING => Lifecycle::Disposing,
            _ => Lifecycle::Disposed,
        }
    }

    /// Whether disposal has started or finished.
    pub fn is_disposed_or_disposing(&self) -> bool {
        self.0.load(Ordering::Acquire) != INITIALIZED
    }

    /// Fail with [`GraphicsError::Disposed`] unless still initialised.
    pub fn ensure_alive(&self, object: &'static str) -> Result<()> {
        if self.is_disposed_or_disposing() {
            Err(GraphicsError::Disposed { object })
        } else {
            Ok(())
        }
    }

    /// Move to `Disposing`. Returns `false` if another caller already did.
    pub fn begin_dispose(&self) -> bool {
        self.0
            .compare_exchange(INITIALIZED, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Disposed`.
    pub fn end_dispose(&self) {
        self.0.store(DISPOSED, Ordering::Release);
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_once() {
        let state = LifecycleState::new();
        assert!(state.ensure_alive("test").is_ok());
        assert!(state.begin_dispose());
        assert_eq!(state.get(), Lifecycle::Disposing);
        assert!(!state.begin_dispose());
        state.end_dispose();
        assert_eq!(state.get(), Lifecycle::Disposed);
        assert!(!state.begin_dispose());
        assert!(matches!(
            state.ensure_alive("test"),
            Err(GraphicsError::Disposed { object: "test" })
        ));
    }
}
