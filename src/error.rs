//! Status codes and the internal error type.
//!
//! Every fallible operation inside the crate returns [`Result`]. A [`Status`]
//! always describes a failure: success is the `Ok` variant, never a status
//! value, which mirrors the C surface where a null error pointer is the only
//! success signal.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request status codes shared by the engine and the wire payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    Success,
    Unknown,
    Internal,
    NotFound,
    InvalidArg,
    Unavailable,
    Unsupported,
    AlreadyExists,
}

impl Code {
    /// All codes, in declaration order.
    pub const ALL: [Code; 8] = [
        Code::Success,
        Code::Unknown,
        Code::Internal,
        Code::NotFound,
        Code::InvalidArg,
        Code::Unavailable,
        Code::Unsupported,
        Code::AlreadyExists,
    ];

    /// Enum-name table used for `ErrorCodeString`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Success => "SUCCESS",
            Code::Unknown => "UNKNOWN",
            Code::Internal => "INTERNAL",
            Code::NotFound => "NOT_FOUND",
            Code::InvalidArg => "INVALID_ARG",
            Code::Unavailable => "UNAVAILABLE",
            Code::Unsupported => "UNSUPPORTED",
            Code::AlreadyExists => "ALREADY_EXISTS",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request status. The code is never [`Code::Success`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Status>;

impl Status {
    /// Build a status from a code and message.
    ///
    /// Returns `None` for [`Code::Success`]: success is never represented by
    /// a status object.
    pub fn create(code: Code, message: impl Into<String>) -> Option<Self> {
        if code == Code::Success {
            return None;
        }
        Some(Self {
            code,
            message: message.into(),
        })
    }

    /// Convert a `(code, message)` pair into a result.
    pub fn check(code: Code, message: impl Into<String>) -> Result<()> {
        match Self::create(code, message) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn with(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::with(Code::Unknown, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with(Code::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with(Code::NotFound, message)
    }

    pub fn invalid_arg(message: impl Into<String>) -> Self {
        Self::with(Code::InvalidArg, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with(Code::Unavailable, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::with(Code::Unsupported, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::with(Code::AlreadyExists, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with additional context, keeping the code.
    pub fn context(self, context: impl fmt::Display) -> Self {
        Self {
            code: self.code,
            message: format!("{context}: {}", self.message),
        }
    }
}

impl From<serde_json::Error> for Status {
    fn from(err: serde_json::Error) -> Self {
        Status::invalid_arg(err.to_string())
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Status::not_found(err.to_string()),
            _ => Status::internal(err.to_string()),
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
