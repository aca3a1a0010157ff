//! HealthStore - The storage contract
//!
//! TigerStyle: One trait, several backends. Every operation takes the
//! caller's `Context` first and fails promptly once it ends.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::error::StorageResult;
use super::record::{HealthRecord, Period};
use crate::context::Context;

/// Persistence contract for daily health records.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Insert a record for a date that has none.
    ///
    /// Returns the stored record with `id`, `created_at` and `updated_at`
    /// assigned (`created_at == updated_at`).
    ///
    /// # Errors
    /// `Duplicate` if the date already has a record.
    async fn create(&self, ctx: &Context, record: &HealthRecord) -> StorageResult<HealthRecord>;

    /// The record for `date`, or `None` when there is none.
    async fn read(&self, ctx: &Context, date: NaiveDate) -> StorageResult<Option<HealthRecord>>;

    /// Records whose date falls in `period`, ascending by date.
    async fn read_range(&self, ctx: &Context, period: Period) -> StorageResult<Vec<HealthRecord>>;

    /// Overwrite the step count of the record for `record.date` and
    /// refresh `updated_at`. `id`, `date` and `created_at` are untouched.
    ///
    /// # Errors
    /// `NotFound` if the date has no record.
    async fn update(&self, ctx: &Context, record: &HealthRecord) -> StorageResult<()>;

    /// Physically remove the record for `date`.
    ///
    /// # Errors
    /// `NotFound` if the date has no record.
    async fn delete(&self, ctx: &Context, date: NaiveDate) -> StorageResult<()>;

    /// Release all backend resources. Calling it again is a no-op.
    async fn close(&self) -> StorageResult<()>;

    /// Round-trip to the backend and check it answers a trivial query.
    ///
    /// # Errors
    /// `Closed` after `close`, the context error, or whatever the
    /// backend reports.
    async fn health_check(&self, ctx: &Context) -> StorageResult<()>;

    /// Records in calendar year `year`, ascending by date.
    async fn read_by_year(&self, ctx: &Context, year: i32) -> StorageResult<Vec<HealthRecord>> {
        let period = Period::year(year)?;
        self.read_range(ctx, period).await
    }

    /// Records in `year`/`month` (1-based), ascending by date.
    async fn read_by_year_month(
        &self,
        ctx: &Context,
        year: i32,
        month: u32,
    ) -> StorageResult<Vec<HealthRecord>> {
        let period = Period::year_month(year, month)?;
        self.read_range(ctx, period).await
    }
}
