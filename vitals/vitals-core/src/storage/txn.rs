//! Transactions - Commit only while the caller still wants the result
//!
//! TigerStyle: One discipline for every mutation.
//!
//! ```text
//!   begin ──► body ──Err──► rollback ──► Err(body error)
//!               │
//!               Ok
//!               ▼
//!          ctx.err()? ──Some──► rollback ──► Err(Cancelled | DeadlineExceeded)
//!               │
//!              None
//!               ▼
//!            commit ──► Ok(value)
//! ```
//!
//! Both engines' transaction handles roll back when dropped, so early
//! returns and unwinding panics also release the transaction.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use super::error::StorageResult;
use super::sqlite::map_sqlite_error;
use crate::context::Context;

/// Run `body` inside an immediate SQLite transaction.
///
/// `BEGIN IMMEDIATE` takes the write lock up front so an existence check
/// and the mutation that follows it cannot interleave with another writer.
pub(crate) fn with_sqlite_tx<T>(
    conn: &mut Connection,
    ctx: &Context,
    op: &'static str,
    body: impl FnOnce(&Transaction<'_>) -> StorageResult<T>,
) -> StorageResult<T> {
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| map_sqlite_error(e, "begin transaction"))?;

    let value = match body(&tx) {
        Ok(value) => value,
        Err(err) => {
            rollback_sqlite(tx, op);
            return Err(err);
        }
    };

    if let Some(err) = ctx.err() {
        warn!(op, error = %err, "context ended before commit, rolling back");
        rollback_sqlite(tx, op);
        return Err(err.into());
    }

    tx.commit()
        .map_err(|e| map_sqlite_error(e, "commit transaction"))?;
    debug!(op, "transaction committed");
    Ok(value)
}

fn rollback_sqlite(tx: Transaction<'_>, op: &'static str) {
    if let Err(e) = tx.rollback() {
        warn!(op, error = %e, "rollback failed");
    }
}

#[cfg(feature = "postgres")]
pub(crate) use pg::{begin_pg, finish_pg};

#[cfg(feature = "postgres")]
mod pg {
    use sqlx::{PgPool, Postgres, Transaction};
    use tracing::{debug, warn};

    use crate::context::Context;
    use crate::storage::error::StorageResult;
    use crate::storage::postgres::map_pg_error;

    /// Borrow a pooled connection and open a transaction on it.
    ///
    /// Waiting for a free connection is bounded by the context.
    pub(crate) async fn begin_pg(
        pool: &PgPool,
        ctx: &Context,
    ) -> StorageResult<Transaction<'static, Postgres>> {
        ctx.run(async {
            pool.begin()
                .await
                .map_err(|e| map_pg_error(e, "begin transaction"))
        })
        .await
    }

    /// Settle a transaction given the outcome of its body.
    ///
    /// The commit itself is not raced against the context: once it has
    /// been sent, its outcome is what the caller sees.
    pub(crate) async fn finish_pg<T>(
        tx: Transaction<'static, Postgres>,
        ctx: &Context,
        op: &'static str,
        outcome: StorageResult<T>,
    ) -> StorageResult<T> {
        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                rollback_pg(tx, op).await;
                return Err(err);
            }
        };

        if let Some(err) = ctx.err() {
            warn!(op, error = %err, "context ended before commit, rolling back");
            rollback_pg(tx, op).await;
            return Err(err.into());
        }

        tx.commit()
            .await
            .map_err(|e| map_pg_error(e, "commit transaction"))?;
        debug!(op, "transaction committed");
        Ok(value)
    }

    async fn rollback_pg(tx: Transaction<'static, Postgres>, op: &'static str) {
        if let Err(e) = tx.rollback().await {
            warn!(op, error = %e, "rollback failed");
        }
    }
}
