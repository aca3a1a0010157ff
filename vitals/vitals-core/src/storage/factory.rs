//! Factory - Open the configured backend
//!
//! TigerStyle: Validate first, then dispatch on the configured kind.

use std::sync::Arc;

use tracing::info;

use super::backend::HealthStore;
use super::error::{StorageError, StorageResult};
use super::sqlite::SqliteStore;
use crate::config::{DatabaseConfig, DatabaseKind};

/// Open the backend described by `config`.
///
/// # Errors
/// Returns `Internal` for an invalid configuration, or whatever the
/// backend's constructor returns.
pub async fn open_store(config: &DatabaseConfig) -> StorageResult<Arc<dyn HealthStore>> {
    config
        .validate()
        .map_err(|e| StorageError::internal(format!("invalid database configuration: {e}")))?;

    info!(kind = %config.kind, "opening storage backend");
    match config.kind {
        DatabaseKind::Sqlite => {
            let store = SqliteStore::open(config.sqlite_path.clone()).await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        DatabaseKind::Postgres => {
            let url = config.connection_string().map_err(|e| {
                StorageError::internal(format!("invalid database configuration: {e}"))
            })?;
            let store = super::postgres::PostgresStore::connect(&url, config.pool.clone()).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseKind::Postgres => Err(StorageError::internal(
            "postgres support was not compiled in (enable the `postgres` feature)",
        )),
    }
}

/// A private in-memory SQLite store.
///
/// # Errors
/// Returns error if the schema cannot be created.
pub async fn open_in_memory() -> StorageResult<Arc<dyn HealthStore>> {
    let store = SqliteStore::open_in_memory().await?;
    Ok(Arc::new(store))
}
