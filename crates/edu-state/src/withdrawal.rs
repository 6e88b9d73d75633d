//! # FIFO Withdrawal Allocation
//!
//! A withdrawal drains an educator's ledger rows oldest settlement month
//! first. Allocation is a two-step process:
//!
//! 1. [`plan_fifo`] computes the per-row debits without touching any row and
//!    fails with `InsufficientBalance` if the total available is short.
//! 2. [`apply_fifo`] plans, then applies every debit. Because the plan is
//!    complete before the first debit, a rejected withdrawal leaves all rows
//!    unchanged.
//!
//! Stores call these inside whatever atomicity they provide (a write lock,
//! a database transaction) so that the read of balances and the debits are
//! one step.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use edu_core::{Month, SettlementId, Timestamp, UserId, WithdrawalId};

use crate::earning::{EarningError, EducatorEarning};

/// The portion of a withdrawal drawn from one ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Settlement whose row was debited.
    pub settlement_id: SettlementId,
    /// Month of that settlement.
    pub month: Month,
    /// Amount debited from the row.
    pub amount: Decimal,
}

/// Record of a processed withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Withdrawal identifier.
    pub id: WithdrawalId,
    /// Educator paid out.
    pub educator: UserId,
    /// Total amount withdrawn.
    pub amount: Decimal,
    /// Per-row debits, oldest month first. Sums to `amount`.
    pub allocations: Vec<Allocation>,
    /// When the withdrawal was applied.
    pub processed_at: Timestamp,
}

/// Compute the FIFO debits for `amount` across `educator`'s rows.
///
/// Rows belonging to other educators and rows with nothing available are
/// skipped. Ties in month are broken by settlement id so the plan is
/// deterministic.
pub fn plan_fifo(
    rows: &[EducatorEarning],
    educator: UserId,
    amount: Decimal,
) -> Result<Vec<Allocation>, EarningError> {
    if amount <= Decimal::ZERO {
        return Err(EarningError::NonPositiveDebit(amount));
    }

    let mut eligible: Vec<&EducatorEarning> = rows
        .iter()
        .filter(|r| r.educator == educator && r.available_balance > Decimal::ZERO)
        .collect();
    eligible.sort_by(|a, b| {
        a.month
            .cmp(&b.month)
            .then_with(|| a.settlement_id.cmp(&b.settlement_id))
    });

    let available: Decimal = eligible.iter().map(|r| r.available_balance).sum();
    if available < amount {
        return Err(EarningError::InsufficientBalance {
            requested: amount,
            available,
        });
    }

    let mut remaining = amount;
    let mut plan = Vec::new();
    for row in eligible {
        if remaining.is_zero() {
            break;
        }
        let take = remaining.min(row.available_balance);
        plan.push(Allocation {
            settlement_id: row.settlement_id,
            month: row.month,
            amount: take,
        });
        remaining -= take;
    }
    Ok(plan)
}

/// Plan and apply a FIFO withdrawal, returning its receipt.
///
/// On error no row is modified.
pub fn apply_fifo(
    rows: &mut [EducatorEarning],
    educator: UserId,
    amount: Decimal,
    at: Timestamp,
) -> Result<WithdrawalReceipt, EarningError> {
    let plan = plan_fifo(rows, educator, amount)?;
    for allocation in &plan {
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.educator == educator && r.settlement_id == allocation.settlement_id)
        {
            row.debit(allocation.amount)?;
        }
    }
    Ok(WithdrawalReceipt {
        id: WithdrawalId::new(),
        educator,
        amount,
        allocations: plan,
        processed_at: at,
    })
}
