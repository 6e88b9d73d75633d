//! # edu-cli — Settlement Scheduler & Admin CLI
//!
//! Provides the `edusettle` command-line interface over
//! [`edu_settlement::SettlementEngine`].
//!
//! ## Subcommands
//!
//! - `edusettle settle run|show|list|verify`: Monthly settlement lifecycle.
//! - `edusettle preview`: What a run would commit, without writing.
//! - `edusettle balance`: Finalized balance plus current-month estimate.
//! - `edusettle withdraw`: FIFO withdrawal from finalized earnings.
//! - `edusettle withdrawals`: An educator's withdrawal receipts.
//!
//! ## Backends
//!
//! With `--database-url` (or `DATABASE_URL`) the engine reads records from
//! and writes the ledger to PostgreSQL. Without it, records come from the
//! `--data` fixture file and the ledger is a JSON snapshot at `--state`,
//! saved after every command that changed it. Commands sharing a snapshot
//! take turns on `<state>.lock`.
//!
//! ```bash
//! edusettle --data records.yaml settle run --month 2026-01
//! edusettle --data records.yaml balance --educator <uuid>
//! edusettle withdraw --educator <uuid> --amount 600.00
//! ```
//!
//! ## Exit Codes
//!
//! `0` success, `1` error, `2` verification drift, `75` retryable conflict.

pub mod account;
pub mod context;
pub mod settle;

#[cfg(test)]
mod test_support;

pub use context::{CliContext, GlobalOpts};

/// Exit code when `settle verify` finds drift.
pub const EXIT_DRIFT: u8 = 2;

/// Exit code for errors the scheduler may retry as-is (`EX_TEMPFAIL`).
pub const EXIT_RETRY: u8 = 75;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
