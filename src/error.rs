//! Error types for hetra

use crate::backends::Backend;
use std::borrow::Cow;
use thiserror::Error;

/// Result type alias using hetra's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hetra operations
#[derive(Error, Debug)]
pub enum Error {
    /// A native driver call failed
    #[error("{backend} driver error {code}: {message}")]
    Native {
        /// Backend that produced the error
        backend: Backend,
        /// Raw native error code
        code: i32,
        /// Mapped human-readable message
        message: String,
    },

    /// The object has already been disposed
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// Out of memory on both the native and host fallback paths
    #[error("Out of memory: failed to allocate {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// Device index out of range for a backend
    #[error("Device index {index} out of range: {backend} reports {count} device(s)")]
    DeviceOutOfRange {
        /// Backend that was queried
        backend: Backend,
        /// The invalid index
        index: usize,
        /// Number of devices the backend reports
        count: usize,
    },

    /// Peer access requested between accelerators of different backends
    #[error("Backend mismatch: {lhs} vs {rhs}")]
    BackendMismatch {
        /// Backend of the accelerator the operation was called on
        lhs: Backend,
        /// Backend of the other accelerator
        rhs: Backend,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Launch configuration exceeds device limits
    #[error("Invalid launch configuration: {reason}")]
    LaunchConfig {
        /// Which limit was violated
        reason: String,
    },

    /// Operation is not supported by a backend
    #[error("{backend} does not support {op}")]
    Unsupported {
        /// Backend that lacks the operation
        backend: Backend,
        /// The operation name
        op: &'static str,
    },
}

impl Error {
    /// Create a backend-tagged native error from a raw driver code.
    ///
    /// The message is produced by the total per-backend code mapping, so
    /// construction never fails regardless of the code value.
    pub fn native(backend: Backend, code: i32) -> Self {
        let message = match backend {
            Backend::Cuda => describe_cuda_error(code).into_owned(),
            Backend::Hip => describe_hip_error(code).into_owned(),
            Backend::Cpu => format!("host error {code}"),
        };
        Self::Native {
            backend,
            code,
            message,
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }
}

/// Map a CUDA driver error code to a human-readable message.
///
/// Total over all `i32` values: codes without a dedicated description render
/// a templated message embedding the raw code.
pub fn describe_cuda_error(code: i32) -> Cow<'static, str> {
    let known: Option<&'static str> = match code {
        0 => Some("success"),
        1 => Some("invalid value"),
        2 => Some("out of memory"),
        3 => Some("driver not initialized"),
        4 => Some("driver shutting down"),
        100 => Some("no CUDA-capable device detected"),
        101 => Some("invalid device ordinal"),
        200 => Some("invalid kernel image"),
        201 => Some("invalid context"),
        218 => Some("invalid PTX"),
        222 => Some("unsupported PTX version"),
        300 => Some("invalid source"),
        301 => Some("file not found"),
        500 => Some("named symbol not found"),
        700 => Some("illegal address during kernel execution"),
        701 => Some("launch out of resources"),
        702 => Some("launch timeout"),
        704 => Some("peer access already enabled"),
        705 => Some("peer access not enabled"),
        716 => Some("misaligned address"),
        719 => Some("launch failed"),
        721 => Some("cooperative launch too large"),
        999 => Some("unknown internal error"),
        _ => None,
    };
    match known {
        Some(msg) => Cow::Borrowed(msg),
        None => Cow::Owned(format!("unknown CUDA error {code}")),
    }
}

/// Map a HIP runtime error code to a human-readable message.
///
/// Total over all `i32` values, same contract as [`describe_cuda_error`].
pub fn describe_hip_error(code: i32) -> Cow<'static, str> {
    let known: Option<&'static str> = match code {
        0 => Some("success"),
        1 => Some("invalid value"),
        2 => Some("out of memory"),
        3 => Some("runtime not initialized"),
        4 => Some("runtime deinitialized"),
        100 => Some("no ROCm-capable device detected"),
        101 => Some("invalid device ordinal"),
        200 => Some("invalid kernel image"),
        201 => Some("invalid context"),
        301 => Some("file not found"),
        302 => Some("shared object symbol not found"),
        303 => Some("shared object init failed"),
        500 => Some("named symbol not found"),
        700 => Some("illegal address during kernel execution"),
        701 => Some("launch out of resources"),
        702 => Some("launch timeout"),
        704 => Some("peer access already enabled"),
        705 => Some("peer access not enabled"),
        719 => Some("launch failed"),
        1052 => Some("invalid function handle"),
        _ => None,
    };
    match known {
        Some(msg) => Cow::Borrowed(msg),
        None => Cow::Owned(format!("unknown HIP error {code}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_descriptions() {
        assert_eq!(describe_cuda_error(2), "out of memory");
        assert_eq!(describe_hip_error(101), "invalid device ordinal");
    }

    #[test]
    fn unknown_codes_render_templated_message() {
        assert_eq!(describe_cuda_error(-7), "unknown CUDA error -7");
        assert_eq!(describe_hip_error(424242), "unknown HIP error 424242");
    }

    #[test]
    fn native_error_carries_backend_and_code() {
        let err = Error::native(Backend::Hip, 2);
        match err {
            Error::Native {
                backend,
                code,
                ref message,
            } => {
                assert_eq!(backend, Backend::Hip);
                assert_eq!(code, 2);
                assert_eq!(message, "out of memory");
            }
            _ => panic!("expected Native variant"),
        }
    }
}
