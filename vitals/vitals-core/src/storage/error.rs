//! Storage Errors
//!
//! TigerStyle: A closed set of conditions callers can branch on. Engine
//! errors are classified here and never escape raw.

use chrono::NaiveDate;

use crate::context::ContextError;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by any `HealthStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// A mutation targeted a date with no record.
    #[error("record not found for date {date}")]
    NotFound {
        /// Date that was looked up
        date: NaiveDate,
    },

    /// A record for this date already exists.
    #[error("record already exists for date {date}")]
    Duplicate {
        /// Conflicting date
        date: NaiveDate,
    },

    /// The caller's context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The caller's context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The backend could not be reached.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// An engine-level constraint other than date uniqueness failed.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A year, or year/month pair, does not describe a calendar period.
    #[error("invalid period: year {year}{}", month_suffix(.month))]
    InvalidPeriod {
        /// Requested year
        year: i32,
        /// Requested month, absent for whole-year reads
        month: Option<u32>,
    },

    /// The backend was closed.
    #[error("storage backend is closed")]
    Closed,

    /// Any other backend failure.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Create a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a constraint error.
    #[must_use]
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create an invalid period error.
    #[must_use]
    pub fn invalid_period(year: i32, month: Option<u32>) -> Self {
        Self::InvalidPeriod { year, month }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is the not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is the duplicate-key condition.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Whether the caller's context ended the operation.
    #[must_use]
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

fn month_suffix(month: &Option<u32>) -> String {
    month.map(|m| format!(" month {m}")).unwrap_or_default()
}

impl From<ContextError> for StorageError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_predicates() {
        assert!(StorageError::NotFound { date: day() }.is_not_found());
        assert!(StorageError::Duplicate { date: day() }.is_duplicate());
        assert!(StorageError::Cancelled.is_context());
        assert!(StorageError::DeadlineExceeded.is_context());
        assert!(!StorageError::connection("down").is_context());
    }

    #[test]
    fn test_context_conversion() {
        assert_eq!(
            StorageError::from(ContextError::Cancelled),
            StorageError::Cancelled
        );
        assert_eq!(
            StorageError::from(ContextError::DeadlineExceeded),
            StorageError::DeadlineExceeded
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            StorageError::Duplicate { date: day() }.to_string(),
            "record already exists for date 2024-01-01"
        );
        assert_eq!(StorageError::Cancelled.to_string(), "context canceled");
        assert_eq!(
            StorageError::invalid_period(2024, Some(13)).to_string(),
            "invalid period: year 2024 month 13"
        );
        assert_eq!(
            StorageError::invalid_period(300_000, None).to_string(),
            "invalid period: year 300000"
        );
    }
}
