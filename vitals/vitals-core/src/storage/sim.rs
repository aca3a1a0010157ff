//! SimHealthStore - In-Memory Store with Fault Injection
//!
//! TigerStyle: Same contract, no engine. Faults are checked before every
//! operation, and a failed operation never touches the map, so tests can
//! assert through `stored_record` that nothing partial was left behind.
//!
//! ```text
//!   op ──► closed? ──► ctx.err()? ──► faults.check()? ──► BTreeMap
//! ```

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use super::backend::HealthStore;
use super::error::{StorageError, StorageResult};
use super::record::{HealthRecord, Period};
use crate::context::Context;
use crate::dst::{FaultInjector, FaultType, SimClock};

#[derive(Debug, Default)]
struct SimState {
    records: BTreeMap<NaiveDate, HealthRecord>,
    last_id: i64,
    closed: bool,
}

/// In-memory `HealthStore` for tests.
///
/// Duplicate and not-found detection match the real backends.
#[derive(Debug, Default)]
pub struct SimHealthStore {
    state: RwLock<SimState>,
    clock: SimClock,
    faults: FaultInjector,
}

impl SimHealthStore {
    /// An empty store with a clock at the epoch and no faults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp records with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SimClock) -> Self {
        self.clock = clock;
        self
    }

    /// Draw faults from `faults`.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// The clock used for `created_at` / `updated_at`.
    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// The fault injector.
    #[must_use]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Every operation fails with `DeadlineExceeded` while set.
    pub fn set_simulate_timeout(&self, on: bool) {
        self.faults.set_forced(FaultType::Timeout, on);
    }

    /// Every operation fails with `Cancelled` while set.
    pub fn set_simulate_cancel(&self, on: bool) {
        self.faults.set_forced(FaultType::Cancel, on);
    }

    /// Every operation fails with a connection error while set.
    pub fn set_simulate_connection_error(&self, on: bool) {
        self.faults.set_forced(FaultType::Connection, on);
    }

    /// Every mutation fails with a constraint error while set.
    pub fn set_simulate_constraint_violation(&self, on: bool) {
        self.faults.set_forced(FaultType::Constraint, on);
    }

    /// Read storage directly, bypassing faults, context and close state.
    #[must_use]
    pub fn stored_record(&self, date: NaiveDate) -> Option<HealthRecord> {
        self.read_state().records.get(&date).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    /// Whether no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record. Ids keep increasing.
    pub fn clear(&self) {
        self.write_state().records.clear();
    }

    // A panic while holding the lock cannot leave a half-applied mutation:
    // every mutation is a single map call.
    fn read_state(&self) -> RwLockReadGuard<'_, SimState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SimState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, ctx: &Context, op: &'static str, write: bool) -> StorageResult<()> {
        if self.read_state().closed {
            return Err(StorageError::Closed);
        }
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if let Some(fault) = self.faults.check(write) {
            debug!(op, ?fault, "simulated failure");
            return Err(fault_error(fault, op));
        }
        Ok(())
    }
}

fn fault_error(fault: FaultType, op: &str) -> StorageError {
    match fault {
        FaultType::Timeout => StorageError::DeadlineExceeded,
        FaultType::Cancel => StorageError::Cancelled,
        FaultType::Connection => {
            StorageError::connection(format!("{op}: simulated connection failure"))
        }
        FaultType::Constraint => {
            StorageError::constraint(format!("{op}: simulated constraint violation"))
        }
    }
}

#[async_trait]
impl HealthStore for SimHealthStore {
    async fn create(&self, ctx: &Context, record: &HealthRecord) -> StorageResult<HealthRecord> {
        self.admit(ctx, "create", true)?;

        let mut state = self.write_state();
        if state.records.contains_key(&record.date) {
            return Err(StorageError::Duplicate { date: record.date });
        }

        state.last_id += 1;
        let now = self.clock.now();
        let created = HealthRecord {
            id: state.last_id,
            date: record.date,
            step_count: record.step_count,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(created.date, created.clone());

        // Postcondition
        assert!(created.is_stored(), "created record must have an id");

        Ok(created)
    }

    async fn read(&self, ctx: &Context, date: NaiveDate) -> StorageResult<Option<HealthRecord>> {
        self.admit(ctx, "read", false)?;
        Ok(self.read_state().records.get(&date).cloned())
    }

    async fn read_range(&self, ctx: &Context, period: Period) -> StorageResult<Vec<HealthRecord>> {
        self.admit(ctx, "read_range", false)?;
        Ok(self
            .read_state()
            .records
            .range(period.start..period.end)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn update(&self, ctx: &Context, record: &HealthRecord) -> StorageResult<()> {
        self.admit(ctx, "update", true)?;

        let now = self.clock.now();
        let mut state = self.write_state();
        let stored = state
            .records
            .get_mut(&record.date)
            .ok_or(StorageError::NotFound { date: record.date })?;
        stored.step_count = record.step_count;
        stored.updated_at = now;

        // Postcondition
        assert!(stored.updated_at >= stored.created_at);

        Ok(())
    }

    async fn delete(&self, ctx: &Context, date: NaiveDate) -> StorageResult<()> {
        self.admit(ctx, "delete", true)?;
        self.write_state()
            .records
            .remove(&date)
            .map(|_| ())
            .ok_or(StorageError::NotFound { date })
    }

    async fn close(&self) -> StorageResult<()> {
        self.write_state().closed = true;
        Ok(())
    }

    async fn health_check(&self, ctx: &Context) -> StorageResult<()> {
        self.admit(ctx, "health_check", false)
    }
}
