//! Store failure codes

use std::fmt;
use thiserror::Error;

/// Native result codes reported by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    ServerNotAvailable,
    ServerError,
    KeyNotFound,
    GenerationError,
    ParameterError,
    KeyExists,
    BinExists,
    Timeout,
    BinTypeError,
    KeyBusy,
    DeviceOverload,
    /// Any code this crate has no name for
    Other(i32),
}

impl ResultCode {
    /// Numeric wire code
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ServerNotAvailable => -8,
            Self::ServerError => 1,
            Self::KeyNotFound => 2,
            Self::GenerationError => 3,
            Self::ParameterError => 4,
            Self::KeyExists => 5,
            Self::BinExists => 6,
            Self::Timeout => 9,
            Self::BinTypeError => 12,
            Self::KeyBusy => 14,
            Self::DeviceOverload => 18,
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            -8 => Self::ServerNotAvailable,
            1 => Self::ServerError,
            2 => Self::KeyNotFound,
            3 => Self::GenerationError,
            4 => Self::ParameterError,
            5 => Self::KeyExists,
            6 => Self::BinExists,
            9 => Self::Timeout,
            12 => Self::BinTypeError,
            14 => Self::KeyBusy,
            18 => Self::DeviceOverload,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "code {code}"),
            named => write!(f, "{named:?} ({})", named.code()),
        }
    }
}

/// Failure reported by the store client
#[derive(Clone, Debug, Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    pub code: ResultCode,
    pub message: String,
}

impl ClientError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type for store client calls
pub type ClientResult<T> = Result<T, ClientError>;
