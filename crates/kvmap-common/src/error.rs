//! Error types for kvmap
//!
//! This is the store-agnostic taxonomy every operation reports. Store
//! specific failure codes are translated into it before they reach the
//! caller.

use thiserror::Error;

/// Common result type for kvmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for kvmap
#[derive(Debug, Error)]
pub enum Error {
    // Mapping errors
    #[error("no entity mapping registered for type {type_name}")]
    UnmappedType { type_name: String },

    #[error("conversion error: {0}")]
    Conversion(String),

    // Write conflicts
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("optimistic lock failure on {key}: {message}")]
    OptimisticLock { key: String, message: String },

    /// Write-time absence (update-only or replace-only target missing).
    /// Reads never produce this; absence on read is a normal return value.
    #[error("record not found: {key}")]
    KeyNotFound { key: String },

    // Caller errors
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Store errors
    #[error("request timeout")]
    Timeout,

    #[error("store error {code}: {message}")]
    Store { code: i32, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Store codes that indicate a transient condition
const TRANSIENT_STORE_CODES: &[i32] = &[
    -8, // server not available
    14, // key busy
    18, // device overload
];

impl Error {
    /// Create an unmapped type error
    pub fn unmapped(type_name: impl Into<String>) -> Self {
        Self::UnmappedType {
            type_name: type_name.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a store error carrying the original failure code
    pub fn store(code: i32, msg: impl Into<String>) -> Self {
        Self::Store {
            code,
            message: msg.into(),
        }
    }

    /// Check if retrying the same call may succeed.
    ///
    /// Conflicts are not retryable as-is: the caller has to re-read first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Store { code, .. } => TRANSIENT_STORE_CODES.contains(code),
            _ => false,
        }
    }

    /// Check if this is a write conflict (duplicate key or stale version)
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::OptimisticLock { .. })
    }

    /// Original store code, when the failure came from the store
    #[must_use]
    pub const fn store_code(&self) -> Option<i32> {
        match self {
            Self::Store { code, .. } => Some(*code),
            _ => None,
        }
    }
}
