//! Error types.
//!
//! Every fallible operation returns [`GraphicsError`]. Native backends report
//! failures as [`NativeError`], which carries the failing API name and the raw
//! result code so the caller can see exactly which native call broke.

use std::fmt;

/// Result alias used across the crate.
pub type Result<T, E = GraphicsError> = std::result::Result<T, E>;

/// Broad classification of a native failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// Host allocation inside the driver failed.
    OutOfHostMemory,
    /// Device memory is exhausted.
    OutOfDeviceMemory,
    /// The device was lost (driver reset, removal).
    DeviceLost,
    /// The swapchain no longer matches the surface.
    SwapchainOutOfDate,
    /// A bounded wait expired.
    Timeout,
    /// Anything else.
    Other,
}

/// A failed native API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{api} returned {code} ({kind:?})")]
pub struct NativeError {
    /// Name of the native entry point.
    pub api: &'static str,
    /// Raw result code as reported by the API.
    pub code: i64,
    /// Classification of `code`.
    pub kind: NativeErrorKind,
}

impl NativeError {
    /// Create a native error.
    pub const fn new(api: &'static str, code: i64, kind: NativeErrorKind) -> Self {
        Self { api, code, kind }
    }

    /// Whether the failure means memory ran out.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self.kind,
            NativeErrorKind::OutOfDeviceMemory | NativeErrorKind::OutOfHostMemory
        )
    }
}

/// Errors surfaced by the device, allocator and resource APIs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// An argument was invalid or belonged to a different device.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Parameter name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A native API call failed.
    #[error("native call {api} failed with result code {code}")]
    NativeCallFailure {
        /// Name of the native entry point.
        api: &'static str,
        /// Raw result code.
        code: i64,
    },

    /// The allocator could not satisfy a request.
    #[error("out of graphics memory: {requested} bytes (alignment {alignment}) from memory type {memory_type}")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: u64,
        /// Requested alignment.
        alignment: u64,
        /// Memory type index the request was routed to.
        memory_type: u32,
    },

    /// The object has been disposed.
    #[error("{object} has been disposed")]
    Disposed {
        /// Kind of object, e.g. `"GraphicsResource"`.
        object: &'static str,
    },

    /// The call is not valid in the object's current state.
    #[error("{object}: cannot {operation} while {state}")]
    InvalidOperation {
        /// Kind of object.
        object: &'static str,
        /// What was attempted.
        operation: &'static str,
        /// State that forbids it.
        state: String,
    },
}

impl GraphicsError {
    /// Shorthand for [`GraphicsError::InvalidArgument`].
    pub fn invalid_argument(name: &'static str, reason: impl fmt::Display) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`GraphicsError::InvalidOperation`].
    pub fn invalid_operation(
        object: &'static str,
        operation: &'static str,
        state: impl fmt::Debug,
    ) -> Self {
        Self::InvalidOperation {
            object,
            operation,
            state: format!("{:?}", state),
        }
    }
}

impl From<NativeError> for GraphicsError {
    fn from(error: NativeError) -> Self {
        Self::NativeCallFailure {
            api: error.api,
            code: error.code,
        }
    }
}
