//! Synchronization primitives.
//!
//! Provides thin wrappers over std or parking_lot mutexes, stat counters,
//! and the disposal state machine.

pub(crate) mod atomics;
pub mod lifecycle;
pub(crate) mod mutex;
