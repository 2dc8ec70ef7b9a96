//! Native backends.
//!
//! [`traits`] defines what a backend must provide; [`types`] holds the
//! descriptors, handles and commands that cross the boundary.
//!
//! ## Backends
//! - `software`: always available; runs on host memory.
//! - `vulkan`: via the `ash` crate (enable the `vulkan` feature).

pub mod software;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use software::{SoftwareAdapter, SoftwareConfig, SoftwareDevice};
pub use traits::{NativeAdapter, NativeDevice, NativeResult};
