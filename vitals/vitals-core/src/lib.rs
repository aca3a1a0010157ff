//! Vitals Core - Daily Health Record Persistence with DST
//!
//! TigerStyle simulation-first persistence layer for date-keyed health
//! metrics (currently: daily step count).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Vitals Core                  │
//! ├─────────────────────────────────────────────┤
//! │  HealthStore trait       │ One contract     │
//! │  SqliteStore             │ Embedded / file  │
//! │  PostgresStore           │ Pooled server    │
//! │  SimHealthStore          │ Fault injection  │
//! ├─────────────────────────────────────────────┤
//! │  Context                 │ Cancel/deadline  │
//! │  DST Framework           │ Clock, RNG       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use vitals_core::{Context, HealthRecord, HealthStore, SqliteStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), vitals_core::StorageError> {
//! let store = SqliteStore::open_in_memory().await?;
//! let ctx = Context::background();
//!
//! let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! store.create(&ctx, &HealthRecord::new(date, 10_000)).await?;
//!
//! let record = store.read(&ctx, date).await?;
//! assert_eq!(record.map(|r| r.step_count), Some(10_000));
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod context;
pub mod dst;
pub mod error;
pub mod storage;

// Re-export common types
pub use config::{ConfigError, DatabaseConfig, DatabaseKind, PoolConfig};
pub use context::{Context, ContextError};
pub use dst::{DeterministicRng, FaultConfig, FaultInjector, FaultType, SimClock};
pub use error::{AppError, ErrorKind};
pub use storage::{
    normalize_date, open_in_memory, open_store, HealthRecord, HealthStore, Period,
    SimHealthStore, SqliteStore, StorageError, StorageResult,
};

#[cfg(feature = "postgres")]
pub use storage::{PoolInfo, PoolStatus, PostgresStore};
