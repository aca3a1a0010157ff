//! Application Errors
//!
//! TigerStyle: The closed taxonomy callers report to users. Storage
//! failures are folded into it without leaking engine detail.

use std::fmt;

use crate::storage::StorageError;

/// Error categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or conflicting request
    BadRequest,
    /// Unparseable date
    InvalidDate,
    /// Unparseable year
    InvalidYear,
    /// Unparseable or out-of-range month
    InvalidMonth,
    /// Body or parameter in the wrong shape
    InvalidFormat,
    /// No record where one was required
    NotFound,
    /// Anything the caller cannot fix
    InternalServer,
}

impl ErrorKind {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::InvalidDate => "InvalidDate",
            Self::InvalidYear => "InvalidYear",
            Self::InvalidMonth => "InvalidMonth",
            Self::InvalidFormat => "InvalidFormat",
            Self::NotFound => "NotFound",
            Self::InternalServer => "InternalServer",
        }
    }

    /// HTTP status a wire layer would answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest
            | Self::InvalidDate
            | Self::InvalidYear
            | Self::InvalidMonth
            | Self::InvalidFormat => 400,
            Self::NotFound => 404,
            Self::InternalServer => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized, user-presentable error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    /// Category
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl AppError {
    /// Create an error of `kind`.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { date } => Self::new(
                ErrorKind::NotFound,
                format!("health record not found for date: {date}"),
            ),
            StorageError::Duplicate { date } => Self::new(
                ErrorKind::BadRequest,
                format!("health record already exists for date: {date}"),
            ),
            StorageError::InvalidPeriod {
                month: Some(month), ..
            } if !(1..=12).contains(&month) => Self::new(
                ErrorKind::InvalidMonth,
                format!("Invalid month: {month} (Use 1-12)"),
            ),
            StorageError::InvalidPeriod { year, .. } => Self::new(
                ErrorKind::InvalidYear,
                format!("Invalid year: {year} (out of supported range)"),
            ),
            StorageError::DeadlineExceeded => {
                Self::new(ErrorKind::InternalServer, "request processing timed out")
            }
            StorageError::Cancelled => {
                Self::new(ErrorKind::InternalServer, "request was cancelled")
            }
            other => {
                tracing::error!(error = %other, "storage failure");
                Self::new(ErrorKind::InternalServer, "internal server error")
            }
        }
    }
}
