//! Small helpers shared across the crate.

pub mod layout;
pub mod lazy;
pub mod size;
