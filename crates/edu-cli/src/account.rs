//! # Educator Account Subcommands
//!
//! `balance`, `withdraw` and `withdrawals`. Withdrawals draw on finalized
//! earnings only, oldest month first; the current-month estimate shown by
//! `balance` is informational.

use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::Decimal;

use edu_core::{parse_amount, Month, UserId};
use edu_settlement::{EducatorBalance, SettlementError};
use edu_state::WithdrawalReceipt;

use crate::context::CliContext;
use crate::{print_json, EXIT_RETRY};

/// Arguments for the `balance` subcommand.
#[derive(Args, Debug)]
pub struct BalanceArgs {
    /// Educator user id.
    #[arg(long)]
    pub educator: UserId,

    /// Month treated as in progress (YYYY-MM). Defaults to the current month.
    #[arg(long)]
    pub as_of: Option<Month>,
}

/// Arguments for the `withdraw` subcommand.
#[derive(Args, Debug)]
pub struct WithdrawArgs {
    /// Educator user id.
    #[arg(long)]
    pub educator: UserId,

    /// Amount to withdraw, at most two decimal places.
    #[arg(long)]
    pub amount: String,
}

/// Arguments for the `withdrawals` subcommand.
#[derive(Args, Debug)]
pub struct WithdrawalsArgs {
    /// Educator user id.
    #[arg(long)]
    pub educator: UserId,
}

/// Execute the balance subcommand.
pub async fn run_balance(args: &BalanceArgs, ctx: &CliContext) -> Result<u8> {
    let balance = match args.as_of {
        Some(month) => {
            ctx.engine()
                .get_educator_balance_as_of(args.educator, month)
                .await
        }
        None => ctx.engine().get_educator_balance(args.educator).await,
    }
    .with_context(|| format!("computing balance of {}", args.educator))?;

    if ctx.json() {
        print_json(&balance)?;
    } else {
        print_balance(&balance);
    }
    Ok(0)
}

/// Execute the withdraw subcommand.
pub async fn run_withdraw(args: &WithdrawArgs, ctx: &CliContext) -> Result<u8> {
    let amount: Decimal = parse_amount(&args.amount).context("invalid --amount")?;

    let receipt = match ctx.engine().process_withdrawal(args.educator, amount).await {
        Ok(receipt) => receipt,
        Err(e @ SettlementError::InsufficientBalance { .. }) => {
            println!("REJECTED: {e}");
            return Ok(1);
        }
        Err(e) if e.is_retryable() => {
            tracing::warn!(educator = %args.educator, "withdrawal not applied, retry later: {e}");
            println!("RETRY: {e}");
            return Ok(EXIT_RETRY);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("withdrawing for {}", args.educator))
        }
    };
    ctx.persist()?;

    if ctx.json() {
        print_json(&receipt)?;
    } else {
        println!(
            "OK: withdrew {} for {} ({})",
            receipt.amount, receipt.educator, receipt.id
        );
        print_allocations(&receipt);
    }
    Ok(0)
}

/// Execute the withdrawals subcommand.
pub async fn run_withdrawals(args: &WithdrawalsArgs, ctx: &CliContext) -> Result<u8> {
    let receipts = ctx
        .engine()
        .list_withdrawals(args.educator)
        .await
        .with_context(|| format!("listing withdrawals of {}", args.educator))?;

    if ctx.json() {
        print_json(&receipts)?;
        return Ok(0);
    }
    if receipts.is_empty() {
        println!("No withdrawals found.");
        return Ok(0);
    }
    for r in &receipts {
        println!("{}  {}  {}", r.processed_at.to_iso8601(), r.id, r.amount);
        print_allocations(r);
    }
    Ok(0)
}

fn print_balance(b: &EducatorBalance) {
    println!("Balance of {} as of {}", b.educator, b.as_of);
    println!("  finalized:       {}", b.finalized_balance);
    println!("  current month:   {}", b.current_month_estimate);
    println!("  total:           {}", b.total_balance);
    for m in &b.monthly_breakdown {
        println!(
            "  {}  earned {:>12}  withdrawn {:>12}  available {:>12}",
            m.month, m.earnings, m.withdrawn, m.available_balance
        );
    }
}

fn print_allocations(r: &WithdrawalReceipt) {
    for a in &r.allocations {
        println!("  {}  {}", a.month, a.amount);
    }
}
