//! Storage - Contract and Backends
//!
//! TigerStyle: One contract, two engines, one simulation double.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     HealthStore Trait                        │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                     ↑                     ↑
//!          │                     │                     │
//! ┌────────┴───────┐   ┌────────┴───────┐   ┌─────────┴──────┐
//! │  SqliteStore   │   │ PostgresStore  │   │ SimHealthStore │
//! │  (embedded)    │   │ (client-server)│   │   (testing)    │
//! └────────────────┘   └────────────────┘   └────────────────┘
//! ```
//!
//! Mutations on both engines go through the helpers in `txn`: roll back
//! on error, roll back if the context ended, otherwise commit.

mod backend;
mod error;
mod factory;
mod record;
mod sim;
mod sqlite;
mod txn;

#[cfg(feature = "postgres")]
mod postgres;

pub use backend::HealthStore;
pub use error::{StorageError, StorageResult};
pub use factory::{open_in_memory, open_store};
pub use record::{normalize_date, HealthRecord, Period};
pub use sim::SimHealthStore;
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::{PoolInfo, PoolStatus, PostgresStore};
