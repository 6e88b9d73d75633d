//! # Settlement Subcommands
//!
//! `settle run|show|list|verify` and `preview`. `run` is what the monthly
//! scheduler invokes; it is idempotent, so re-running a finalized month
//! prints the stored summary and writes nothing.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use edu_core::{Month, UserId};
use edu_settlement::{SettlementPreview, SettlementSummary, VerificationReport};

use crate::context::CliContext;
use crate::{print_json, EXIT_DRIFT, EXIT_RETRY};

/// Arguments for the `settle` subcommand.
#[derive(Args, Debug)]
pub struct SettleArgs {
    #[command(subcommand)]
    pub command: SettleCommand,
}

/// Settlement lifecycle subcommands.
#[derive(Subcommand, Debug)]
pub enum SettleCommand {
    /// Settle a month, or print its summary if already finalized.
    Run {
        /// Month to settle (YYYY-MM).
        #[arg(long)]
        month: Month,
    },

    /// Show a stored settlement.
    Show {
        /// Month (YYYY-MM).
        #[arg(long)]
        month: Month,
    },

    /// List stored settlements, oldest first.
    List,

    /// Recompute a finalized month and report drift. Exits 2 on drift.
    Verify {
        /// Month (YYYY-MM).
        #[arg(long)]
        month: Month,
    },
}

/// Arguments for the `preview` subcommand.
#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Month to compute (YYYY-MM).
    #[arg(long)]
    pub month: Month,

    /// Only show this educator's allocation.
    #[arg(long)]
    pub educator: Option<UserId>,
}

/// Execute the settle subcommand.
pub async fn run_settle(args: &SettleArgs, ctx: &CliContext) -> Result<u8> {
    match &args.command {
        SettleCommand::Run { month } => cmd_run(ctx, *month).await,
        SettleCommand::Show { month } => cmd_show(ctx, *month).await,
        SettleCommand::List => cmd_list(ctx).await,
        SettleCommand::Verify { month } => cmd_verify(ctx, *month).await,
    }
}

async fn cmd_run(ctx: &CliContext, month: Month) -> Result<u8> {
    let summary = match ctx.engine().run_settlement(month).await {
        Ok(summary) => summary,
        Err(e) if e.is_retryable() => {
            tracing::warn!(%month, "settlement not committed, retry later: {e}");
            println!("RETRY: {e}");
            return Ok(EXIT_RETRY);
        }
        Err(e) => return Err(e).with_context(|| format!("settling {month}")),
    };
    ctx.persist()?;

    if ctx.json() {
        print_json(&summary)?;
    } else {
        println!("OK: settlement {} {}", summary.month, summary.status);
        print_summary(&summary);
    }
    Ok(0)
}

async fn cmd_show(ctx: &CliContext, month: Month) -> Result<u8> {
    let summary = ctx
        .engine()
        .get_settlement(month)
        .await
        .with_context(|| format!("reading settlement {month}"))?
        .with_context(|| format!("no settlement stored for {month}"))?;

    if ctx.json() {
        print_json(&summary)?;
    } else {
        println!("Settlement {} {}", summary.month, summary.status);
        print_summary(&summary);
    }
    Ok(0)
}

async fn cmd_list(ctx: &CliContext) -> Result<u8> {
    let all = ctx
        .engine()
        .list_settlements()
        .await
        .context("listing settlements")?;

    if ctx.json() {
        print_json(&all)?;
        return Ok(0);
    }
    if all.is_empty() {
        println!("No settlements found.");
        return Ok(0);
    }
    println!(
        "{:<8} {:<12} {:>14} {:>14} {:>12} {:>9}",
        "MONTH", "STATUS", "GROSS", "DISTRIBUTED", "POINTS", "EDUCATORS"
    );
    for s in &all {
        println!(
            "{:<8} {:<12} {:>14} {:>14} {:>12} {:>9}",
            s.month.to_string(),
            s.status.to_string(),
            s.gross_revenue.to_string(),
            s.total_revenue.to_string(),
            s.total_points.to_string(),
            s.educator_count
        );
    }
    Ok(0)
}

async fn cmd_verify(ctx: &CliContext, month: Month) -> Result<u8> {
    let report = ctx
        .engine()
        .verify_settlement(month)
        .await
        .with_context(|| format!("verifying settlement {month}"))?;

    if ctx.json() {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(if report.matches() { 0 } else { EXIT_DRIFT })
}

/// Execute the preview subcommand.
pub async fn run_preview(args: &PreviewArgs, ctx: &CliContext) -> Result<u8> {
    let mut preview = ctx
        .engine()
        .preview(args.month)
        .await
        .with_context(|| format!("computing preview for {}", args.month))?;
    if let Some(educator) = args.educator {
        preview.allocations.retain(|a| a.educator == educator);
    }

    if ctx.json() {
        print_json(&preview)?;
    } else {
        print_preview(&preview);
    }
    Ok(0)
}

fn print_summary(s: &SettlementSummary) {
    println!("  id:              {}", s.id);
    println!("  subscribers:     {}", s.total_subscribers);
    println!("  gross revenue:   {}", s.gross_revenue);
    println!("  distributable:   {}", s.total_revenue);
    println!("  total points:    {}", s.total_points);
    println!("  point value:     {}", s.point_value);
    println!("  educators:       {}", s.educator_count);
    if let Some(at) = &s.finalized_at {
        println!("  finalized at:    {}", at.to_iso8601());
    }
    if let Some(digest) = &s.digest {
        println!("  digest:          {digest}");
    }
}

fn print_preview(p: &SettlementPreview) {
    println!("Preview {} (not committed)", p.month);
    println!("  subscribers:     {}", p.figures.total_subscribers);
    println!("  gross revenue:   {}", p.figures.gross_revenue);
    println!("  distributable:   {}", p.figures.total_revenue);
    println!("  total points:    {}", p.figures.total_points);
    println!("  point value:     {}", p.figures.point_value);
    for a in &p.allocations {
        println!("  {}  points {:>10}  earnings {:>12}", a.educator, a.points, a.earnings);
    }
}

fn print_report(r: &VerificationReport) {
    if r.matches() {
        println!("OK: settlement {} matches current records", r.month);
        return;
    }
    println!("DRIFT: settlement {} differs from current records", r.month);
    if r.stored != r.recomputed {
        println!(
            "  gross revenue:   {} -> {}",
            r.stored.gross_revenue, r.recomputed.gross_revenue
        );
        println!(
            "  total points:    {} -> {}",
            r.stored.total_points, r.recomputed.total_points
        );
        println!(
            "  point value:     {} -> {}",
            r.stored.point_value, r.recomputed.point_value
        );
    }
    for d in &r.drift {
        println!("  {}  {} -> {}", d.educator, d.stored, d.recomputed);
    }
}
