//! The closed error taxonomy crossing every component boundary.
//!
//! A single `api_error`-style enum: low-level failures are mapped into one
//! of these kinds at the point they leave a component, never
//! logged-and-swallowed internally.

use thiserror::Error;

/// Closed set of error kinds the core exposes to callers.
///
/// Adapters (FUSE, WinFsp, the wire protocol) map each variant onto the
/// appropriate host code; this type itself carries no host-specific
/// representation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// Operation completed successfully. Most call sites use `Result<T,
    /// ApiError>` and never construct this variant directly, but it is kept
    /// so event payloads can carry "no error" without an `Option` wrapper.
    #[error("success")]
    Success,

    #[error("path does not exist")]
    NotFound,

    #[error("path already exists")]
    AlreadyExists,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("permission denied")]
    PermissionDenied,

    #[error("operation not supported by this provider")]
    NotSupported,

    #[error("local cache I/O failed")]
    IoError,

    #[error("provider communication failed")]
    CommError,

    #[error("decryption failed: AEAD verification or KDF header corrupt")]
    DecryptionError,

    #[error("incompatible remote-mount protocol version")]
    IncompatibleVersion,

    #[error("cache not initialized")]
    CacheNotInitialized,

    #[error("invalid argument")]
    InvalidArgument,
}

impl ApiError {
    /// `true` for [`ApiError::Success`]; used at boundaries that model
    /// success/failure as a signed integer (see `packet`'s wire error code).
    pub fn is_success(self) -> bool {
        matches!(self, ApiError::Success)
    }

    /// Stable, small integer used on the wire and as a C-style code at
    /// adapter boundaries. Negative values mirror POSIX errno conventions;
    /// adapters translate further into NT status codes for the WinFsp
    /// surface.
    pub fn wire_code(self) -> i32 {
        match self {
            ApiError::Success => 0,
            ApiError::NotFound => -2,
            ApiError::AlreadyExists => -17,
            ApiError::NotADirectory => -20,
            ApiError::IsADirectory => -21,
            ApiError::NotEmpty => -39,
            ApiError::PermissionDenied => -13,
            ApiError::NotSupported => -95,
            ApiError::IoError => -5,
            ApiError::CommError => -110,
            ApiError::DecryptionError => -74,
            ApiError::IncompatibleVersion => -201,
            ApiError::CacheNotInitialized => -202,
            ApiError::InvalidArgument => -22,
        }
    }

    /// Inverse of [`Self::wire_code`]; unknown codes map to `IoError`.
    pub fn from_wire_code(code: i32) -> Self {
        match code {
            0 => ApiError::Success,
            -2 => ApiError::NotFound,
            -17 => ApiError::AlreadyExists,
            -20 => ApiError::NotADirectory,
            -21 => ApiError::IsADirectory,
            -39 => ApiError::NotEmpty,
            -13 => ApiError::PermissionDenied,
            -95 => ApiError::NotSupported,
            -110 => ApiError::CommError,
            -74 => ApiError::DecryptionError,
            -201 => ApiError::IncompatibleVersion,
            -202 => ApiError::CacheNotInitialized,
            -22 => ApiError::InvalidArgument,
            _ => ApiError::IoError,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
