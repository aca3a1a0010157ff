//! SqliteStore - Embedded Storage
//!
//! TigerStyle: File-backed (or in-memory) SQLite with compiled statements
//! and transactional mutations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SqliteStore                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Writer: one connection, leased per mutation                 │
//! │  Readers: WAL read-only connections (file databases)         │
//! │  Lease: semaphore permit, wait bounded by the ctx            │
//! │  Stmts: fixed `Stmt` table, compiled once into the cache     │
//! │  Writes: BEGIN IMMEDIATE + commit-time context check         │
//! │  Cancel: progress handler aborts statements once ctx ends    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! An in-memory database lives inside a single connection, so there the
//! reader and writer pools are the same pool.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS health_records (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     date DATE NOT NULL UNIQUE,
//!     step_count INTEGER NOT NULL,
//!     created_at DATETIME NOT NULL,
//!     updated_at DATETIME NOT NULL
//! );
//! CREATE UNIQUE INDEX IF NOT EXISTS idx_health_records_date ON health_records(date);
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::backend::HealthStore;
use super::error::{StorageError, StorageResult};
use super::record::{HealthRecord, Period};
use super::txn::with_sqlite_tx;
use crate::constants::{
    SQLITE_BUSY_TIMEOUT_MS, SQLITE_IN_MEMORY_PATH, SQLITE_PROGRESS_CHECK_INTERVAL_OPS,
    SQLITE_READER_CONNECTIONS, SQLITE_STATEMENT_CACHE_CAPACITY,
};
use crate::context::Context;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS health_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date DATE NOT NULL UNIQUE,
        step_count INTEGER NOT NULL,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_health_records_date ON health_records(date);
";

// =============================================================================
// Compiled Statements
// =============================================================================

/// Every statement the store issues. The set is fixed, so lookups need no
/// lock; the compiled form lives in each connection's statement cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stmt {
    Insert,
    Select,
    SelectRange,
    Exists,
    Update,
    Delete,
}

impl Stmt {
    const ALL: [Stmt; 6] = [
        Self::Insert,
        Self::Select,
        Self::SelectRange,
        Self::Exists,
        Self::Update,
        Self::Delete,
    ];

    /// Statements a read-only connection compiles.
    const READS: [Stmt; 2] = [Self::Select, Self::SelectRange];

    fn name(self) -> &'static str {
        match self {
            Self::Insert => "insert_health_record",
            Self::Select => "select_health_record",
            Self::SelectRange => "select_range_health_record",
            Self::Exists => "exists_health_record",
            Self::Update => "update_health_record",
            Self::Delete => "delete_health_record",
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Insert => {
                "INSERT INTO health_records (date, step_count, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4)"
            }
            Self::Select => {
                "SELECT id, date, step_count, created_at, updated_at \
                 FROM health_records WHERE date = ?1"
            }
            Self::SelectRange => {
                "SELECT id, date, step_count, created_at, updated_at \
                 FROM health_records WHERE date >= ?1 AND date < ?2 ORDER BY date"
            }
            Self::Exists => "SELECT 1 FROM health_records WHERE date = ?1",
            Self::Update => {
                "UPDATE health_records SET step_count = ?1, updated_at = ?2 WHERE date = ?3"
            }
            Self::Delete => "DELETE FROM health_records WHERE date = ?1",
        }
    }
}

// =============================================================================
// Connection Pool
// =============================================================================

/// Which pool an operation leases from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// A fixed set of connections, each leased to one caller at a time.
///
/// One permit per connection; holding a permit guarantees an idle
/// connection is available.
#[derive(Debug)]
struct ConnPool {
    role: &'static str,
    size: usize,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl ConnPool {
    fn new(role: &'static str, conns: Vec<Connection>) -> Arc<Self> {
        // Precondition
        assert!(!conns.is_empty(), "{role} pool needs at least one connection");

        Arc::new(Self {
            role,
            size: conns.len(),
            permits: Arc::new(Semaphore::new(conns.len())),
            idle: Mutex::new(conns),
            closed: AtomicBool::new(false),
        })
    }

    /// Lease a connection, waiting no longer than `ctx` allows.
    async fn checkout(self: &Arc<Self>, ctx: &Context) -> StorageResult<Lease> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        let permit = ctx
            .run(async {
                Arc::clone(&self.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| StorageError::Closed)
            })
            .await?;

        let conn = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| {
                StorageError::internal(format!("{} pool has a permit but no connection", self.role))
            })?;

        Ok(Lease {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Refuse new leases, wait for outstanding ones, then close every
    /// connection. Returns `false` if the pool was already closed.
    async fn close(&self) -> StorageResult<bool> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        let all = u32::try_from(self.size)
            .map_err(|_| StorageError::internal(format!("{} pool too large", self.role)))?;
        let held = self
            .permits
            .acquire_many(all)
            .await
            .map_err(|_| StorageError::Closed)?;
        let conns = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        self.permits.close();
        drop(held);

        // Postcondition
        assert_eq!(conns.len(), self.size, "every connection must be back before close");

        tokio::task::spawn_blocking(move || close_connections(conns))
            .await
            .map_err(|e| StorageError::internal(format!("close task failed: {e}")))??;
        Ok(true)
    }

    #[cfg(test)]
    fn leased(&self) -> usize {
        self.size - self.permits.available_permits()
    }
}

/// A leased connection. Dropping it returns the connection to the pool
/// before the permit is released.
struct Lease {
    conn: Option<Connection>,
    pool: Arc<ConnPool>,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    fn conn_mut(&mut self) -> StorageResult<&mut Connection> {
        self.conn.as_mut().ok_or(StorageError::Closed)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conn);
        }
    }
}

fn close_connections(conns: Vec<Connection>) -> StorageResult<()> {
    let mut first_err = None;
    for conn in conns {
        conn.flush_prepared_statement_cache();
        if let Err((_, e)) = conn.close() {
            warn!(error = %e, "closing sqlite connection failed");
            first_err.get_or_insert_with(|| map_sqlite_error(e, "close connection"));
        }
    }
    first_err.map_or(Ok(()), Err)
}

// =============================================================================
// SqliteStore
// =============================================================================

/// Embedded SQLite backend.
///
/// TigerStyle: One writer, several readers, engine-enforced uniqueness.
#[derive(Debug)]
pub struct SqliteStore {
    path: String,
    writer: Arc<ConnPool>,
    readers: Arc<ConnPool>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// `":memory:"` selects a private in-memory database.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened, the schema cannot be
    /// created, or a statement fails to compile.
    pub async fn open(path: impl Into<String>) -> StorageResult<Self> {
        let path = path.into();
        // Precondition
        assert!(!path.is_empty(), "sqlite path cannot be empty");

        let open_path = path.clone();
        let (writer, readers) = tokio::task::spawn_blocking(move || open_connections(&open_path))
            .await
            .map_err(|e| StorageError::internal(format!("open task failed: {e}")))??;

        let writer = ConnPool::new("writer", vec![writer]);
        let readers = if readers.is_empty() {
            Arc::clone(&writer)
        } else {
            ConnPool::new("reader", readers)
        };

        info!(path = %path, readers = readers.size, "sqlite store opened");
        Ok(Self {
            path,
            writer,
            readers,
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns error if the schema cannot be created.
    pub async fn open_in_memory() -> StorageResult<Self> {
        Self::open(SQLITE_IN_MEMORY_PATH).await
    }

    /// The path this store was opened with.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run `f` on a leased connection on the blocking pool.
    ///
    /// Waiting for the lease is bounded by `ctx`. While `f` runs,
    /// statements abort once `ctx` ends; the abort is reported as the
    /// context's error. The blocking task is always awaited, so a commit
    /// that happened is never reported as cancelled.
    async fn with_conn<T, F>(
        &self,
        ctx: &Context,
        access: Access,
        op: &'static str,
        f: F,
    ) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection, &Context) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = match access {
            Access::Read => &self.readers,
            Access::Write => &self.writer,
        };
        let mut lease = pool.checkout(ctx).await?;

        let task_ctx = ctx.clone();
        let task = tokio::task::spawn_blocking(move || {
            // The context may have ended while the lease was queued.
            if let Some(err) = task_ctx.err() {
                return Err(err.into());
            }

            // A panic mid-operation already rolled back via Transaction's
            // drop, so the connection is consistent and safe to reuse.
            let conn = lease.conn_mut()?;
            let watched = AssertUnwindSafe(task_ctx.clone());
            conn.progress_handler(
                SQLITE_PROGRESS_CHECK_INTERVAL_OPS,
                Some(move || watched.is_done()),
            );
            let result = f(conn, &task_ctx);
            conn.progress_handler(0, None::<fn() -> bool>);

            // An interrupted ROLLBACK leaves the transaction open.
            if !conn.is_autocommit() {
                warn!(op, "transaction still open after operation, rolling back");
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(op, error = %e, "rollback failed");
                }
            }

            match result {
                Err(err) if err.is_context() => Err(task_ctx.err().map_or(err, Into::into)),
                other => other,
            }
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StorageError::internal(format!("{op} task failed: {e}"))),
        };

        debug!(op, ?access, ok = result.is_ok(), "sqlite operation finished");
        result
    }
}

/// The writer, plus read-only connections for a file database.
fn open_connections(path: &str) -> StorageResult<(Connection, Vec<Connection>)> {
    let writer = open_writer(path)?;
    if path == SQLITE_IN_MEMORY_PATH {
        return Ok((writer, Vec::new()));
    }

    let readers = (0..SQLITE_READER_CONNECTIONS)
        .map(|_| open_reader(path))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok((writer, readers))
}

fn open_raw(path: &str) -> StorageResult<Connection> {
    let opened = if path == SQLITE_IN_MEMORY_PATH {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    };
    let conn =
        opened.map_err(|e| StorageError::connection(format!("failed to open {path}: {e}")))?;

    conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))
        .map_err(|e| map_sqlite_error(e, "set busy timeout"))?;
    conn.set_prepared_statement_cache_capacity(SQLITE_STATEMENT_CACHE_CAPACITY);
    Ok(conn)
}

fn prepare_all(conn: &Connection, stmts: &[Stmt]) -> StorageResult<()> {
    for stmt in stmts {
        conn.prepare_cached(stmt.sql())
            .map_err(|e| map_sqlite_error(e, &format!("prepare statement {}", stmt.name())))?;
    }
    Ok(())
}

fn open_writer(path: &str) -> StorageResult<Connection> {
    let conn = open_raw(path)?;
    if path != SQLITE_IN_MEMORY_PATH {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| map_sqlite_error(e, "configure journal"))?;
    }

    conn.execute_batch(SCHEMA)
        .map_err(|e| map_sqlite_error(e, "create schema"))?;
    prepare_all(&conn, &Stmt::ALL)?;
    Ok(conn)
}

/// Must run after the writer created the schema.
fn open_reader(path: &str) -> StorageResult<Connection> {
    let conn = open_raw(path)?;
    conn.execute_batch("PRAGMA query_only = ON;")
        .map_err(|e| map_sqlite_error(e, "configure reader"))?;
    prepare_all(&conn, &Stmt::READS)?;
    Ok(conn)
}

// =============================================================================
// Row Mapping
// =============================================================================

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HealthRecord> {
    Ok(HealthRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        step_count: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Whether the engine rejected a write because of the unique date index.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || msg
                    .as_deref()
                    .is_some_and(|m| m.contains("UNIQUE constraint failed"))
        }
        _ => false,
    }
}

/// Classify a rusqlite error; `what` names the step that failed.
pub(crate) fn map_sqlite_error(err: rusqlite::Error, what: &str) -> StorageError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        match e.code {
            ErrorCode::OperationInterrupted => return StorageError::Cancelled,
            ErrorCode::ConstraintViolation => {
                return StorageError::constraint(format!("{what}: {err}"))
            }
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure => {
                return StorageError::connection(format!("{what}: {err}"))
            }
            _ => {}
        }
    }
    StorageError::internal(format!("{what}: {err}"))
}

// =============================================================================
// HealthStore Implementation
// =============================================================================

#[async_trait]
impl HealthStore for SqliteStore {
    async fn create(&self, ctx: &Context, record: &HealthRecord) -> StorageResult<HealthRecord> {
        let date = record.date;
        let step_count = record.step_count;

        let created = self
            .with_conn(ctx, Access::Write, "create", move |conn, ctx| {
                with_sqlite_tx(conn, ctx, "create", |tx| {
                    let now = Utc::now();
                    tx.prepare_cached(Stmt::Insert.sql())
                        .map_err(|e| map_sqlite_error(e, "prepare insert"))?
                        .execute(params![date, step_count, now, now])
                        .map_err(|e| {
                            if is_unique_violation(&e) {
                                StorageError::Duplicate { date }
                            } else {
                                map_sqlite_error(e, "insert record")
                            }
                        })?;

                    Ok(HealthRecord {
                        id: tx.last_insert_rowid(),
                        date,
                        step_count,
                        created_at: now,
                        updated_at: now,
                    })
                })
            })
            .await?;

        // Postconditions
        assert!(created.is_stored(), "created record must have an id");
        assert_eq!(created.created_at, created.updated_at);

        Ok(created)
    }

    async fn read(&self, ctx: &Context, date: NaiveDate) -> StorageResult<Option<HealthRecord>> {
        let record = self
            .with_conn(ctx, Access::Read, "read", move |conn, _| {
                conn.prepare_cached(Stmt::Select.sql())
                    .map_err(|e| map_sqlite_error(e, "prepare select"))?
                    .query_row(params![date], row_to_record)
                    .optional()
                    .map_err(|e| map_sqlite_error(e, "scan record"))
            })
            .await?;

        // Postcondition
        if let Some(r) = &record {
            assert_eq!(r.date, date, "returned record must match requested date");
        }

        Ok(record)
    }

    async fn read_range(&self, ctx: &Context, period: Period) -> StorageResult<Vec<HealthRecord>> {
        self.with_conn(ctx, Access::Read, "read_range", move |conn, _| {
            let mut stmt = conn
                .prepare_cached(Stmt::SelectRange.sql())
                .map_err(|e| map_sqlite_error(e, "prepare select_range"))?;
            let rows = stmt
                .query_map(params![period.start, period.end], row_to_record)
                .map_err(|e| map_sqlite_error(e, "query records"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| map_sqlite_error(e, "scan record"))
        })
        .await
    }

    async fn update(&self, ctx: &Context, record: &HealthRecord) -> StorageResult<()> {
        let date = record.date;
        let step_count = record.step_count;

        self.with_conn(ctx, Access::Write, "update", move |conn, ctx| {
            with_sqlite_tx(conn, ctx, "update", |tx| {
                let exists = tx
                    .prepare_cached(Stmt::Exists.sql())
                    .map_err(|e| map_sqlite_error(e, "prepare exists"))?
                    .exists(params![date])
                    .map_err(|e| map_sqlite_error(e, "check existence"))?;
                if !exists {
                    return Err(StorageError::NotFound { date });
                }

                tx.prepare_cached(Stmt::Update.sql())
                    .map_err(|e| map_sqlite_error(e, "prepare update"))?
                    .execute(params![step_count, Utc::now(), date])
                    .map_err(|e| map_sqlite_error(e, "execute update"))?;
                Ok(())
            })
        })
        .await
    }

    async fn delete(&self, ctx: &Context, date: NaiveDate) -> StorageResult<()> {
        self.with_conn(ctx, Access::Write, "delete", move |conn, ctx| {
            with_sqlite_tx(conn, ctx, "delete", |tx| {
                let exists = tx
                    .prepare_cached(Stmt::Exists.sql())
                    .map_err(|e| map_sqlite_error(e, "prepare exists"))?
                    .exists(params![date])
                    .map_err(|e| map_sqlite_error(e, "check existence"))?;
                if !exists {
                    return Err(StorageError::NotFound { date });
                }

                tx.prepare_cached(Stmt::Delete.sql())
                    .map_err(|e| map_sqlite_error(e, "prepare delete"))?
                    .execute(params![date])
                    .map_err(|e| map_sqlite_error(e, "execute delete"))?;
                Ok(())
            })
        })
        .await
    }

    async fn close(&self) -> StorageResult<()> {
        let writer = self.writer.close().await;
        let readers = if Arc::ptr_eq(&self.writer, &self.readers) {
            Ok(false)
        } else {
            self.readers.close().await
        };

        if writer? | readers? {
            info!(path = %self.path, "sqlite store closed");
        }
        Ok(())
    }

    async fn health_check(&self, ctx: &Context) -> StorageResult<()> {
        let one: i64 = self
            .with_conn(ctx, Access::Read, "health_check", |conn, _| {
                conn.query_row("SELECT 1", [], |row| row.get(0))
                    .map_err(|e| map_sqlite_error(e, "health check query"))
            })
            .await?;
        if one != 1 {
            return Err(StorageError::internal(format!(
                "health check returned {one}, expected 1"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    /// Never finishes on its own; only the progress handler stops it.
    const ENDLESS_QUERY: &str =
        "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory().await.unwrap()
    }

    fn endless(conn: &Connection) -> StorageResult<i64> {
        conn.query_row(ENDLESS_QUERY, [], |row| row.get(0))
            .map_err(|e| map_sqlite_error(e, "endless query"))
    }

    /// Hold one `access` connection busy until `ctx` ends.
    ///
    /// Returns once the statement is running.
    async fn occupy(
        store: &Arc<SqliteStore>,
        access: Access,
        ctx: &Context,
    ) -> JoinHandle<StorageResult<i64>> {
        let (started_tx, started_rx) = oneshot::channel();
        let store = Arc::clone(store);
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            store
                .with_conn(&ctx, access, "occupy", move |conn, _| {
                    started_tx.send(()).ok();
                    endless(conn)
                })
                .await
        });
        started_rx.await.unwrap();
        handle
    }

    #[test]
    fn test_statement_names_are_unique() {
        let mut names: Vec<_> = Stmt::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Stmt::ALL.len());
        assert!(Stmt::ALL.len() <= SQLITE_STATEMENT_CACHE_CAPACITY);
    }

    #[tokio::test]
    async fn test_crud_scenario() {
        let store = store().await;
        let ctx = Context::background();
        let day = date(2024, 1, 1);

        let created = store.create(&ctx, &HealthRecord::new(day, 10_000)).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.created_at, created.updated_at);

        let read = store.read(&ctx, day).await.unwrap().unwrap();
        assert_eq!(read, created);

        store.update(&ctx, &HealthRecord::new(day, 12_000)).await.unwrap();
        let updated = store.read(&ctx, day).await.unwrap().unwrap();
        assert_eq!(updated.step_count, 12_000);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= updated.created_at);

        store.delete(&ctx, day).await.unwrap();
        assert!(store.read(&ctx, day).await.unwrap().is_none());

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_leaves_original_untouched() {
        let store = store().await;
        let ctx = Context::background();
        let day = date(2024, 5, 5);

        let original = store.create(&ctx, &HealthRecord::new(day, 8_000)).await.unwrap();
        let err = store
            .create(&ctx, &HealthRecord::new(day, 9_000))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Duplicate { date: day });
        assert_eq!(store.read(&ctx, day).await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = store().await;
        let ctx = Context::background();
        let day = date(2024, 6, 1);

        let err = store.update(&ctx, &HealthRecord::new(day, 1)).await.unwrap_err();
        assert!(err.is_not_found());
        let err = store.delete(&ctx, day).await.unwrap_err();
        assert!(err.is_not_found());

        assert!(store.read(&ctx, day).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_create_writes_nothing() {
        let store = store().await;
        let cancelled = Context::background();
        cancelled.cancel();
        let day = date(2024, 7, 1);

        let err = store
            .create(&cancelled, &HealthRecord::new(day, 500))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Cancelled);
        let fresh = Context::background();
        assert!(store.read(&fresh, day).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = store().await;
        store.close().await.unwrap();
        store.close().await.unwrap();

        let err = store
            .read(&Context::background(), date(2024, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Closed);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.db").to_string_lossy().into_owned();
        let ctx = Context::background();
        let day = date(2024, 2, 29);

        let store = SqliteStore::open(path.clone()).await.unwrap();
        store.create(&ctx, &HealthRecord::new(day, 4_321)).await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteStore::open(path).await.unwrap();
        let record = reopened.read(&ctx, day).await.unwrap().unwrap();
        assert_eq!(record.step_count, 4_321);
        reopened.close().await.unwrap();
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let insert = |steps: i32| {
            conn.execute(
                Stmt::Insert.sql(),
                params![date(2024, 1, 1), steps, Utc::now(), Utc::now()],
            )
        };

        insert(1).unwrap();
        let err = insert(2).unwrap_err();

        assert!(is_unique_violation(&err));
        assert!(matches!(
            map_sqlite_error(err, "insert"),
            StorageError::Constraint(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_interrupts_running_write() {
        let store = store().await;
        let ctx = Context::background();
        let day = date(2024, 9, 1);
        let (started_tx, started_rx) = oneshot::channel();

        let work = store.with_conn(&ctx, Access::Write, "fill", move |conn, ctx| {
            with_sqlite_tx(conn, ctx, "fill", |tx| {
                tx.execute(Stmt::Insert.sql(), params![day, 1, Utc::now(), Utc::now()])
                    .map_err(|e| map_sqlite_error(e, "insert"))?;
                started_tx.send(()).ok();
                endless(tx)
            })
        });
        let canceller = async {
            started_rx.await.unwrap();
            ctx.cancel();
        };

        let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(work, canceller)
        })
        .await
        .expect("running statement was not interrupted");

        assert_eq!(result, Err(StorageError::Cancelled));
        assert!(store
            .read(&Context::background(), day)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deadline_interrupts_running_read() {
        let store = store().await;
        let ctx = Context::with_timeout(Duration::from_millis(30));

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            store.with_conn(&ctx, Access::Read, "scan", |conn, _| endless(conn)),
        )
        .await
        .expect("running statement was not interrupted");
        assert_eq!(result, Err(StorageError::DeadlineExceeded));

        // The handler is removed, so the connection serves later calls.
        store.health_check(&Context::background()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_read_honours_deadline() {
        let store = Arc::new(store().await);
        let busy_ctx = Context::background();
        let busy = occupy(&store, Access::Write, &busy_ctx).await;
        assert_eq!(store.readers.leased(), 1);

        let started = std::time::Instant::now();
        let err = store
            .read(&Context::with_timeout(Duration::from_millis(20)), date(2024, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(2));

        busy_ctx.cancel();
        assert_eq!(busy.await.unwrap(), Err(StorageError::Cancelled));
        assert!(store
            .read(&Context::background(), date(2024, 1, 1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_reads_proceed_past_busy_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db").to_string_lossy().into_owned();
        let store = Arc::new(SqliteStore::open(path).await.unwrap());
        let ctx = Context::background();
        let day = date(2024, 10, 1);
        let created = store.create(&ctx, &HealthRecord::new(day, 3)).await.unwrap();

        let busy_ctx = Context::background();
        let writer = occupy(&store, Access::Write, &busy_ctx).await;
        let reader = occupy(&store, Access::Read, &busy_ctx).await;
        assert_eq!(store.writer.leased(), 1);
        assert_eq!(store.readers.leased(), 1);

        let bounded = Context::with_timeout(Duration::from_secs(5));
        assert_eq!(store.read(&bounded, day).await.unwrap(), Some(created));
        assert_eq!(store.read_by_year(&bounded, 2024).await.unwrap().len(), 1);

        busy_ctx.cancel();
        assert_eq!(writer.await.unwrap(), Err(StorageError::Cancelled));
        assert_eq!(reader.await.unwrap(), Err(StorageError::Cancelled));
        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_waits_for_running_operation() {
        let store = Arc::new(store().await);
        let busy_ctx = Context::background();
        let busy = occupy(&store, Access::Write, &busy_ctx).await;

        let closing = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closing.is_finished());
        assert_eq!(
            store.read(&Context::background(), date(2024, 1, 1)).await,
            Err(StorageError::Closed)
        );

        busy_ctx.cancel();
        assert_eq!(busy.await.unwrap(), Err(StorageError::Cancelled));
        closing.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = store().await;
        store.health_check(&Context::background()).await.unwrap();
        store.close().await.unwrap();
        assert_eq!(
            store.health_check(&Context::background()).await,
            Err(StorageError::Closed)
        );
    }
}
