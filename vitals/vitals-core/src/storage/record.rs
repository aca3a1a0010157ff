//! HealthRecord - One row per calendar date
//!
//! TigerStyle: The date is the business key; `id` and timestamps are
//! assigned by the backend.

use chrono::{DateTime, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

// =============================================================================
// HealthRecord
// =============================================================================

/// Daily health metrics for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Backend-assigned identifier (0 until stored)
    pub id: i64,
    /// Calendar date, unique across records
    pub date: NaiveDate,
    /// Steps walked on `date`
    pub step_count: i32,
    /// Set once at insertion
    pub created_at: DateTime<Utc>,
    /// Refreshed on every update
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    /// A record ready to be passed to `create` or `update`.
    ///
    /// Timestamps are placeholders; backends overwrite them.
    #[must_use]
    pub fn new(date: NaiveDate, step_count: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            date,
            step_count,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a backend has assigned an id.
    #[must_use]
    pub fn is_stored(&self) -> bool {
        self.id != 0
    }
}

/// Strip the time-of-day from a timestamp, in the timestamp's own zone.
#[must_use]
pub fn normalize_date<Tz: TimeZone>(ts: &DateTime<Tz>) -> NaiveDate {
    ts.date_naive()
}

// =============================================================================
// Period
// =============================================================================

/// A half-open date range `[start, end)` used by the range reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    /// First day included
    pub start: NaiveDate,
    /// First day excluded
    pub end: NaiveDate,
}

impl Period {
    /// The whole calendar year.
    ///
    /// # Errors
    /// Returns `InvalidPeriod` if the year is outside chrono's range.
    pub fn year(year: i32) -> StorageResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| StorageError::invalid_period(year, None))?;
        let end = start
            .checked_add_months(Months::new(12))
            .ok_or_else(|| StorageError::invalid_period(year, None))?;
        Ok(Self { start, end })
    }

    /// One calendar month.
    ///
    /// # Errors
    /// Returns `InvalidPeriod` unless `month` is 1..=12 and the year is
    /// representable.
    pub fn year_month(year: i32, month: u32) -> StorageResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| StorageError::invalid_period(year, Some(month)))?;
        let end = start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| StorageError::invalid_period(year, Some(month)))?;
        Ok(Self { start, end })
    }

    /// Whether `date` falls inside the period.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Number of days covered.
    #[must_use]
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_new_record_is_unstored() {
        let record = HealthRecord::new(date(2024, 1, 1), 10_000);
        assert!(!record.is_stored());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_json_shape() {
        let mut record = HealthRecord::new(date(2024, 1, 1), 10_000);
        record.id = 7;
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["date"], "2024-01-01");
        assert_eq!(value["step_count"], 10_000);

        let back: HealthRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_year_period() {
        let period = Period::year(2024).unwrap();
        assert_eq!(period.start, date(2024, 1, 1));
        assert_eq!(period.end, date(2025, 1, 1));
        assert_eq!(period.days(), 366);
    }

    #[test]
    fn test_month_period_is_half_open() {
        let period = Period::year_month(2024, 1).unwrap();
        assert!(period.contains(date(2024, 1, 1)));
        assert!(period.contains(date(2024, 1, 31)));
        assert!(!period.contains(date(2024, 2, 1)));
        assert!(!period.contains(date(2023, 12, 31)));
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        let period = Period::year_month(2023, 12).unwrap();
        assert_eq!(period.end, date(2024, 1, 1));
    }

    #[test]
    fn test_february_leap_year() {
        assert_eq!(Period::year_month(2024, 2).unwrap().days(), 29);
        assert_eq!(Period::year_month(2023, 2).unwrap().days(), 28);
    }

    #[test]
    fn test_invalid_month() {
        assert_eq!(
            Period::year_month(2024, 13),
            Err(StorageError::invalid_period(2024, Some(13)))
        );
        assert_eq!(
            Period::year_month(2024, 0),
            Err(StorageError::invalid_period(2024, Some(0)))
        );
    }

    #[test]
    fn test_year_out_of_range() {
        assert_eq!(
            Period::year(300_000),
            Err(StorageError::invalid_period(300_000, None))
        );
    }

    #[test]
    fn test_normalize_date_uses_local_day() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let ts = tz.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        assert_eq!(normalize_date(&ts), date(2024, 3, 10));
    }
}
