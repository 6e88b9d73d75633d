//! # Educator Earnings Ledger Row
//!
//! One row per (educator, finalized settlement). Rows are created when a
//! settlement is committed and debited by withdrawals afterwards.
//!
//! ## Ledger Invariant
//!
//! `available_balance == earnings - withdrawn` and `0 <= withdrawn <= earnings`
//! after every operation. `withdrawn` never decreases: a restatement of the
//! earnings (re-running a month whose first commit was interrupted) keeps
//! the withdrawn total and is rejected if it would push earnings below it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edu_core::{Month, SettlementId, UserId};

/// Errors from ledger row operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EarningError {
    /// Debit exceeds the row's available balance.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount requested.
        requested: Decimal,
        /// Amount available.
        available: Decimal,
    },

    /// Non-positive debit.
    #[error("debit amount must be positive, got {0}")]
    NonPositiveDebit(Decimal),

    /// A restatement would leave earnings below what was already paid out.
    #[error(
        "restating {educator} for {month} to {earnings} would erase {withdrawn} already withdrawn"
    )]
    WouldEraseWithdrawals {
        /// Educator.
        educator: UserId,
        /// Settlement month.
        month: Month,
        /// Proposed earnings.
        earnings: Decimal,
        /// Amount already withdrawn.
        withdrawn: Decimal,
    },

    /// Stored figures do not satisfy the ledger invariant.
    #[error("ledger row for {educator} in {month} is inconsistent: {reason}")]
    Inconsistent {
        /// Educator.
        educator: UserId,
        /// Settlement month.
        month: Month,
        /// What is wrong.
        reason: String,
    },
}

/// An educator's earnings within one finalized settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducatorEarning {
    /// The educator.
    pub educator: UserId,
    /// Settlement the row belongs to.
    pub settlement_id: SettlementId,
    /// Month of that settlement. Withdrawals drain rows oldest month first.
    pub month: Month,
    /// Points earned in the month.
    pub points: Decimal,
    /// Currency earned, rounded to the cent.
    pub earnings: Decimal,
    /// Total withdrawn from this row so far.
    pub withdrawn: Decimal,
    /// `earnings - withdrawn`.
    pub available_balance: Decimal,
}

impl EducatorEarning {
    /// A fresh row with nothing withdrawn.
    pub fn new(
        educator: UserId,
        settlement_id: SettlementId,
        month: Month,
        points: Decimal,
        earnings: Decimal,
    ) -> Self {
        Self {
            educator,
            settlement_id,
            month,
            points,
            earnings,
            withdrawn: Decimal::ZERO,
            available_balance: earnings,
        }
    }

    /// Replace points and earnings, keeping the withdrawn total.
    pub fn restate(&mut self, points: Decimal, earnings: Decimal) -> Result<(), EarningError> {
        if earnings < self.withdrawn {
            return Err(EarningError::WouldEraseWithdrawals {
                educator: self.educator,
                month: self.month,
                earnings,
                withdrawn: self.withdrawn,
            });
        }
        self.points = points;
        self.earnings = earnings;
        self.available_balance = earnings - self.withdrawn;
        Ok(())
    }

    /// Move `amount` from available to withdrawn.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), EarningError> {
        if amount <= Decimal::ZERO {
            return Err(EarningError::NonPositiveDebit(amount));
        }
        if amount > self.available_balance {
            return Err(EarningError::InsufficientBalance {
                requested: amount,
                available: self.available_balance,
            });
        }
        self.withdrawn += amount;
        self.available_balance -= amount;
        Ok(())
    }

    /// Verify the ledger invariant on a row loaded from storage.
    pub fn check_invariant(&self) -> Result<(), EarningError> {
        let fail = |reason: String| EarningError::Inconsistent {
            educator: self.educator,
            month: self.month,
            reason,
        };
        if self.withdrawn < Decimal::ZERO {
            return Err(fail(format!("negative withdrawn {}", self.withdrawn)));
        }
        if self.withdrawn > self.earnings {
            return Err(fail(format!(
                "withdrawn {} exceeds earnings {}",
                self.withdrawn, self.earnings
            )));
        }
        if self.available_balance != self.earnings - self.withdrawn {
            return Err(fail(format!(
                "available {} != earnings {} - withdrawn {}",
                self.available_balance, self.earnings, self.withdrawn
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(earnings: Decimal) -> EducatorEarning {
        EducatorEarning::new(
            UserId::new(),
            SettlementId::new(),
            Month::new(2026, 1).unwrap(),
            dec!(40),
            earnings,
        )
    }

    #[test]
    fn new_row_is_fully_available() {
        let r = row(dec!(700.00));
        assert_eq!(r.available_balance, dec!(700.00));
        assert_eq!(r.withdrawn, Decimal::ZERO);
        r.check_invariant().unwrap();
    }

    #[test]
    fn debit_moves_balance() {
        let mut r = row(dec!(300));
        r.debit(dec!(120.50)).unwrap();
        assert_eq!(r.withdrawn, dec!(120.50));
        assert_eq!(r.available_balance, dec!(179.50));
        r.check_invariant().unwrap();
    }

    #[test]
    fn overdraw_leaves_row_untouched() {
        let mut r = row(dec!(300));
        let before = r.clone();
        let err = r.debit(dec!(300.01)).unwrap_err();
        assert_eq!(
            err,
            EarningError::InsufficientBalance {
                requested: dec!(300.01),
                available: dec!(300),
            }
        );
        assert_eq!(r, before);
    }

    #[test]
    fn non_positive_debit_rejected() {
        let mut r = row(dec!(300));
        assert!(matches!(r.debit(Decimal::ZERO), Err(EarningError::NonPositiveDebit(_))));
        assert!(r.debit(dec!(-1)).is_err());
    }

    #[test]
    fn restate_keeps_withdrawn() {
        let mut r = row(dec!(300));
        r.debit(dec!(100)).unwrap();
        r.restate(dec!(50), dec!(400)).unwrap();
        assert_eq!(r.withdrawn, dec!(100));
        assert_eq!(r.available_balance, dec!(300));
        r.check_invariant().unwrap();
    }

    #[test]
    fn restate_below_withdrawn_rejected() {
        let mut r = row(dec!(300));
        r.debit(dec!(200)).unwrap();
        let before = r.clone();
        assert!(matches!(
            r.restate(dec!(5), dec!(150)),
            Err(EarningError::WouldEraseWithdrawals { .. })
        ));
        assert_eq!(r, before);
    }

    #[test]
    fn invariant_detects_corruption() {
        let mut r = row(dec!(300));
        r.available_balance = dec!(299);
        assert!(r.check_invariant().is_err());

        let mut r = row(dec!(300));
        r.withdrawn = dec!(301);
        r.available_balance = dec!(-1);
        assert!(r.check_invariant().is_err());
    }
}
