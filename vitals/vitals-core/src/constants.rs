//! TigerStyle Constants
//!
//! Named limits and defaults. Units are part of every name.

// =============================================================================
// SQLite
// =============================================================================

/// Reserved SQLite path selecting a private in-memory database.
pub const SQLITE_IN_MEMORY_PATH: &str = ":memory:";

/// How long a SQLite writer waits for a competing lock before failing.
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Prepared statement cache slots (must cover every compiled statement).
pub const SQLITE_STATEMENT_CACHE_CAPACITY: usize = 16;

/// Read-only connections kept open alongside the writer (file databases).
pub const SQLITE_READER_CONNECTIONS: u32 = 4;

/// VM instructions between context checks while a statement runs.
pub const SQLITE_PROGRESS_CHECK_INTERVAL_OPS: i32 = 100;

// =============================================================================
// Connection Pool Defaults
// =============================================================================

/// Maximum pooled connections.
pub const POOL_CONNECTIONS_MAX_DEFAULT: u32 = 25;

/// Minimum pooled connections kept open.
pub const POOL_CONNECTIONS_MIN_DEFAULT: u32 = 5;

/// Maximum lifetime of a pooled connection.
pub const POOL_CONN_LIFETIME_SECS_DEFAULT: u64 = 60 * 60;

/// Maximum idle time before a pooled connection is closed.
pub const POOL_CONN_IDLE_SECS_DEFAULT: u64 = 30 * 60;

/// Idle time after which a connection is pinged before reuse.
pub const POOL_HEALTH_CHECK_PERIOD_SECS_DEFAULT: u64 = 60;

/// How long to wait for a free connection.
pub const POOL_ACQUIRE_TIMEOUT_SECS_DEFAULT: u64 = 30;

/// Upper bound on the connectivity ping at construction.
pub const POOL_PING_TIMEOUT_SECS_DEFAULT: u64 = 5;

// =============================================================================
// Configuration Defaults
// =============================================================================

/// Default Postgres host.
pub const DB_HOST_DEFAULT: &str = "localhost";

/// Default Postgres port.
pub const DB_PORT_DEFAULT: u16 = 5432;

/// Default database name.
pub const DB_NAME_DEFAULT: &str = "health_tracker";

/// Default database user.
pub const DB_USER_DEFAULT: &str = "postgres";

/// Default Postgres SSL mode.
pub const DB_SSL_MODE_DEFAULT: &str = "disable";

/// Default SQLite database file.
pub const DB_PATH_DEFAULT: &str = "./health_tracker.db";

// =============================================================================
// DST
// =============================================================================

/// Maximum single clock advance in simulation (1 day).
pub const DST_TIME_ADVANCE_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Time unit conversion.
pub const TIME_MS_PER_SEC: u64 = 1000;
