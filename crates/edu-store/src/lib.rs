//! # edu-store — PostgreSQL Persistence
//!
//! Implements the `edu-settlement` ports over PostgreSQL via SQLx.
//!
//! ## Architecture
//!
//! The database is **optional**. When `DATABASE_URL` is set, the CLI reads
//! source records from and writes the ledger to PostgreSQL. When absent, it
//! uses fixture files and a JSON ledger snapshot instead.
//!
//! - [`PgRecords`]: subscription and engagement readers. Engagement is
//!   aggregated in SQL; only per-educator counts leave the database.
//! - [`PgLedger`]: settlements, earnings and withdrawals. Finalization and
//!   withdrawals each run in a single transaction under row locks.
//!
//! Queries are runtime-checked (`sqlx::query_as`) with `FromRow` row structs
//! in [`rows`], so the crate builds without a live database.

pub mod ledger;
pub mod records;
pub mod rows;

use sqlx::postgres::{PgPool, PgPoolOptions};

use edu_settlement::StoreError;

pub use ledger::PgLedger;
pub use records::PgRecords;

/// Connect to `url` and apply embedded migrations.
///
/// Returns `Err` if the connection or a migration fails.
pub async fn connect(url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;
    tracing::info!("connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(pool)
}

/// Map a driver error to the port error.
pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
