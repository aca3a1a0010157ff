//! Vitals - Daily Health Record CLI
//!
//! Operational front end over `vitals-core`: opens the configured backend
//! (SQLite file or pooled PostgreSQL), runs one operation bounded by a
//! timeout, and prints the result as JSON.
//!
//! Configuration comes from `DB_*` environment variables (a `.env` file is
//! loaded first); flags override them.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use vitals_core::{
    AppError, Context, DatabaseConfig, DatabaseKind, ErrorKind, HealthRecord, HealthStore,
};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Application name
pub const APP_NAME: &str = "vitals";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bound on a single operation
pub const OPERATION_TIMEOUT_SECS_DEFAULT: u64 = 5;

// =============================================================================
// CLI
// =============================================================================

/// Vitals - Daily health record store
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Store and query daily step counts")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Backend to use (sqlite | postgresql); overrides DB_TYPE
    #[arg(long, global = true)]
    db_type: Option<DatabaseKind>,

    /// SQLite database file; overrides DB_PATH
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Seconds before the operation is abandoned
    #[arg(long, default_value_t = OPERATION_TIMEOUT_SECS_DEFAULT, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the step count for a date
    Create {
        /// Date as YYYY-MM-DD or YYYYMMDD
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        /// Steps walked
        steps: i32,
    },
    /// Show the record for a date
    Get {
        /// Date as YYYY-MM-DD or YYYYMMDD
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
    },
    /// List the records of a year
    Year {
        /// Calendar year
        year: i32,
    },
    /// List the records of a month
    Month {
        /// Calendar year
        year: i32,
        /// Month, 1-12
        month: u32,
    },
    /// Overwrite the step count for a date
    Update {
        /// Date as YYYY-MM-DD or YYYYMMDD
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        /// Steps walked
        steps: i32,
    },
    /// Remove the record for a date
    Delete {
        /// Date as YYYY-MM-DD or YYYYMMDD
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
    },
    /// Check that the backend is reachable
    Ping,
}

/// Accept the ISO form and the compact `YYYYMMDD` form.
fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|_| {
            AppError::new(
                ErrorKind::InvalidDate,
                format!("Invalid date format: {s} (Use YYYY-MM-DD or YYYYMMDD)"),
            )
        })
}

fn validate_steps(steps: i32) -> Result<(), AppError> {
    if steps < 0 {
        return Err(AppError::new(
            ErrorKind::BadRequest,
            format!("step count must be non-negative, got {steps}"),
        ));
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn run(
    store: &Arc<dyn HealthStore>,
    ctx: &Context,
    command: Command,
) -> Result<serde_json::Value, AppError> {
    let value = match command {
        Command::Create { date, steps } => {
            validate_steps(steps)?;
            let created = store.create(ctx, &HealthRecord::new(date, steps)).await?;
            json!(created)
        }
        Command::Get { date } => match store.read(ctx, date).await? {
            Some(record) => json!(record),
            None => {
                return Err(AppError::new(
                    ErrorKind::NotFound,
                    format!("health record not found for date: {date}"),
                ))
            }
        },
        Command::Year { year } => json!(store.read_by_year(ctx, year).await?),
        Command::Month { year, month } => {
            json!(store.read_by_year_month(ctx, year, month).await?)
        }
        Command::Update { date, steps } => {
            validate_steps(steps)?;
            store.update(ctx, &HealthRecord::new(date, steps)).await?;
            match store.read(ctx, date).await? {
                Some(record) => json!(record),
                None => json!({ "date": date }),
            }
        }
        Command::Delete { date } => {
            store.delete(ctx, date).await?;
            json!({ "deleted": date })
        }
        Command::Ping => {
            store.health_check(ctx).await?;
            json!({ "status": "ok" })
        }
    };
    Ok(value)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging (stderr, so stdout stays machine-readable)
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    tracing::info!("{} v{}", APP_NAME, APP_VERSION);

    let mut config = DatabaseConfig::from_env()?;
    if let Some(kind) = cli.db_type {
        config.kind = kind;
    }
    if let Some(path) = cli.db_path {
        config.sqlite_path = path;
    }
    tracing::debug!(?config, "database configuration");

    let store = vitals_core::open_store(&config).await?;
    let ctx = Context::with_timeout(Duration::from_secs(cli.timeout));

    let outcome = run(&store, &ctx, cli.command).await;
    store.close().await?;

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let body = json!({ "error": err.kind.as_str(), "message": err.message });
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
