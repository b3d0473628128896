//! Status codes and error types for the tessera engine
//!
//! Every fallible operation in the engine reports one of the [`Status`] codes.
//! Library functions return [`TesseraResult`], whose error type
//! [`TesseraError`] carries the status plus a human readable message.
//!
//! # Design
//!
//! - **`Status`**: the flat taxonomy exposed to callers (`Ok`, `InvalidState`, ...)
//! - **`TesseraError`**: one variant per non-`Ok` status
//! - **`critical!`**: unrecoverable internal corruption; logs and aborts the
//!   current thread instead of travelling through the status channel
//!
//! # Examples
//!
//! ```
//! use tessera_core::error::{Status, TesseraError};
//!
//! let err = TesseraError::invalid_state("expression already submitted");
//! assert_eq!(err.status(), Status::InvalidState);
//! ```

use std::fmt;
use thiserror::Error;

/// Flat status taxonomy reported by every engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Error = 1,
    InvalidArgument = 2,
    InvalidState = 3,
    NotImplemented = 4,
    NoAcceleration = 5,
    DeviceNotFound = 6,
    PlatformNotFound = 7,
    MemOpFailed = 8,
    NoValue = 9,
}

impl Status {
    /// Returns `true` for [`Status::Ok`]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "Ok",
            Status::Error => "Error",
            Status::InvalidArgument => "InvalidArgument",
            Status::InvalidState => "InvalidState",
            Status::NotImplemented => "NotImplemented",
            Status::NoAcceleration => "NoAcceleration",
            Status::DeviceNotFound => "DeviceNotFound",
            Status::PlatformNotFound => "PlatformNotFound",
            Status::MemOpFailed => "MemOpFailed",
            Status::NoValue => "NoValue",
        };
        f.write_str(name)
    }
}

/// Error type for all engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Error: {0}")]
    Generic(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("No acceleration: {0}")]
    NoAcceleration(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Platform not found: {0}")]
    PlatformNotFound(String),

    #[error("Memory operation failed: {0}")]
    MemOpFailed(String),

    #[error("No value: {0}")]
    NoValue(String),
}

/// Result type alias for engine operations
pub type TesseraResult<T> = Result<T, TesseraError>;

impl TesseraError {
    /// Status code carried by this error
    pub fn status(&self) -> Status {
        match self {
            TesseraError::Generic(_) => Status::Error,
            TesseraError::InvalidArgument(_) => Status::InvalidArgument,
            TesseraError::InvalidState(_) => Status::InvalidState,
            TesseraError::NotImplemented(_) => Status::NotImplemented,
            TesseraError::NoAcceleration(_) => Status::NoAcceleration,
            TesseraError::DeviceNotFound(_) => Status::DeviceNotFound,
            TesseraError::PlatformNotFound(_) => Status::PlatformNotFound,
            TesseraError::MemOpFailed(_) => Status::MemOpFailed,
            TesseraError::NoValue(_) => Status::NoValue,
        }
    }

    /// Message without the status prefix
    pub fn message(&self) -> &str {
        match self {
            TesseraError::Generic(m)
            | TesseraError::InvalidArgument(m)
            | TesseraError::InvalidState(m)
            | TesseraError::NotImplemented(m)
            | TesseraError::NoAcceleration(m)
            | TesseraError::DeviceNotFound(m)
            | TesseraError::PlatformNotFound(m)
            | TesseraError::MemOpFailed(m)
            | TesseraError::NoValue(m) => m,
        }
    }

    /// Build an error from a status code and message.
    ///
    /// `Status::Ok` is not an error; it maps onto [`TesseraError::Generic`].
    pub fn from_status(status: Status, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            Status::Ok | Status::Error => TesseraError::Generic(msg),
            Status::InvalidArgument => TesseraError::InvalidArgument(msg),
            Status::InvalidState => TesseraError::InvalidState(msg),
            Status::NotImplemented => TesseraError::NotImplemented(msg),
            Status::NoAcceleration => TesseraError::NoAcceleration(msg),
            Status::DeviceNotFound => TesseraError::DeviceNotFound(msg),
            Status::PlatformNotFound => TesseraError::PlatformNotFound(msg),
            Status::MemOpFailed => TesseraError::MemOpFailed(msg),
            Status::NoValue => TesseraError::NoValue(msg),
        }
    }

    pub fn generic(msg: impl Into<String>) -> Self {
        TesseraError::Generic(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TesseraError::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        TesseraError::InvalidState(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        TesseraError::NotImplemented(msg.into())
    }

    pub fn no_acceleration(msg: impl Into<String>) -> Self {
        TesseraError::NoAcceleration(msg.into())
    }

    pub fn no_value(msg: impl Into<String>) -> Self {
        TesseraError::NoValue(msg.into())
    }

    /// Create a dimension mismatch error
    pub fn dim_mismatch(what: &str, expected: (usize, usize), got: (usize, usize)) -> Self {
        TesseraError::InvalidArgument(format!(
            "{what}: expected {}x{}, got {}x{}",
            expected.0, expected.1, got.0, got.1
        ))
    }
}

/// Report unrecoverable internal corruption.
///
/// Emits an `error` event and panics. Never used for caller mistakes.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        ::tracing::error!(target: "tessera::critical", "{}", msg);
        panic!("tessera critical failure: {}", msg)
    }};
}
