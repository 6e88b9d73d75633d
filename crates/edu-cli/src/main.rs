//! # edusettle CLI entry point
//!
//! Parses command-line arguments, opens the configured backend and
//! dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use edu_cli::account::{
    run_balance, run_withdraw, run_withdrawals, BalanceArgs, WithdrawArgs, WithdrawalsArgs,
};
use edu_cli::settle::{run_preview, run_settle, PreviewArgs, SettleArgs};
use edu_cli::{CliContext, GlobalOpts};

/// Monthly revenue and engagement-points settlement.
///
/// Settles each calendar month once: prorated subscription revenue, the
/// educator share of it, and weighted engagement points per educator.
/// Serves educator balances and FIFO withdrawals over the finalized ledger.
#[derive(Parser, Debug)]
#[command(name = "edusettle", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Monthly settlement lifecycle (run, show, list, verify).
    Settle(SettleArgs),

    /// Compute a month's revenue, points and allocations without writing.
    Preview(PreviewArgs),

    /// Educator balance: finalized earnings plus current-month estimate.
    Balance(BalanceArgs),

    /// Withdraw from an educator's finalized earnings, oldest month first.
    Withdraw(WithdrawArgs),

    /// List an educator's withdrawals.
    Withdrawals(WithdrawalsArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "edusettle starting");

    let result = match CliContext::open(&cli.global).await {
        Ok(ctx) => match &cli.command {
            Commands::Settle(args) => run_settle(args, &ctx).await,
            Commands::Preview(args) => run_preview(args, &ctx).await,
            Commands::Balance(args) => run_balance(args, &ctx).await,
            Commands::Withdraw(args) => run_withdraw(args, &ctx).await,
            Commands::Withdrawals(args) => run_withdrawals(args, &ctx).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
