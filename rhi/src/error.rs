//! Error types and the contract-violation policy.
//!
//! Two kinds of failure exist in this crate:
//!
//! - Creation-time problems (bad descriptors, driver refusing to create an
//!   object, stale keys) are returned as [`RhiError`].
//! - Contract violations (re-entrant locks, out-of-range locks, destroying a
//!   texture that still has views, driver calls off the context thread) are
//!   programming errors. They are logged and then abort the current thread
//!   through [`fatal!`](crate::fatal).

use thiserror::Error;

/// Errors that can occur in the resource layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RhiError {
    /// Failed to initialize a backend or context.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// The driver failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A requested feature is not supported by the backend.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,

    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A key no longer refers to a live object.
    #[error("stale {0} key")]
    InvalidHandle(&'static str),

    /// The context that owned a command queue has been dropped.
    #[error("rendering context is gone")]
    ContextLost,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for resource-layer operations.
pub type RhiResult<T> = Result<T, RhiError>;

/// Report a contract violation and abort the current thread.
///
/// The message is logged at `error` level first so it reaches the log sink
/// even when the panic is caught by a test harness or a thread boundary.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        log::error!("{message}");
        panic!("{message}");
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RhiError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = RhiError::InvalidParameter("ring needs at least two buffers".to_string());
        assert_eq!(
            err.to_string(),
            "invalid parameter: ring needs at least two buffers"
        );

        let err = RhiError::InvalidHandle("texture");
        assert_eq!(err.to_string(), "stale texture key");
    }

    #[test]
    #[should_panic(expected = "lock of 64 bytes")]
    fn test_fatal_panics_with_message() {
        fatal!("lock of {} bytes", 64);
    }
}
