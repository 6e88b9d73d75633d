//! # Settlement Errors
//!
//! [`StoreError`] is what ports return. [`SettlementError`] is what the
//! calculators and the engine return; every variant names the [`Phase`] it
//! came from and, where one applies, the settlement month.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edu_core::{Month, UserId};
use edu_state::EarningError;

/// Where in the settlement pipeline an error arose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Subscription revenue computation.
    Revenue,
    /// Engagement points computation.
    Points,
    /// Per-educator earnings allocation.
    Allocation,
    /// Writing the settlement and its earnings.
    Commit,
    /// Balance reads.
    Balance,
    /// Withdrawal processing.
    Withdrawal,
    /// Read-only recomputation of a finalized month.
    Verify,
}

impl Phase {
    /// Lowercase phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::Points => "points",
            Self::Allocation => "allocation",
            Self::Commit => "commit",
            Self::Balance => "balance",
            Self::Withdrawal => "withdrawal",
            Self::Verify => "verify",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by read and write ports.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached or the operation failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The month is already committed; nothing was written.
    #[error("settlement for {month} is already finalized")]
    AlreadyFinalized {
        /// Settlement month.
        month: Month,
    },

    /// The settlement row changed between open and finalize.
    #[error("settlement for {month} was modified concurrently")]
    Contended {
        /// Settlement month.
        month: Month,
    },

    /// A ledger rule rejected the write.
    #[error(transparent)]
    Ledger(#[from] EarningError),

    /// Stored data failed to decode or violates an invariant.
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Errors from revenue, points and settlement operations.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Missing or invalid reference data. Raised before any write.
    #[error("data integrity violation in {phase} for {month}: {reason}")]
    DataIntegrity {
        /// Month being processed.
        month: Month,
        /// Pipeline phase.
        phase: Phase,
        /// What is wrong with the data.
        reason: String,
    },

    /// Withdrawal exceeds the finalized balance. Nothing was mutated.
    #[error("insufficient balance for {educator}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Educator requesting the withdrawal.
        educator: UserId,
        /// Amount requested.
        requested: Decimal,
        /// Finalized balance available.
        available: Decimal,
    },

    /// The same month is being settled elsewhere. Safe to retry.
    #[error("settlement for {month} is being finalized concurrently ({phase})")]
    ConcurrencyConflict {
        /// Month being processed.
        month: Month,
        /// Pipeline phase.
        phase: Phase,
    },

    /// Underlying read or write failed. Status is unchanged; safe to retry.
    #[error("store failure in {phase}{}: {source}", month_suffix(.month))]
    TransientStore {
        /// Month being processed, if the operation was month-scoped.
        month: Option<Month>,
        /// Pipeline phase.
        phase: Phase,
        /// Port error.
        #[source]
        source: StoreError,
    },

    /// Malformed withdrawal amount.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        /// The amount as supplied.
        amount: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A restatement would erase already-withdrawn earnings.
    #[error("ledger conflict in {phase}{}: {source}", month_suffix(.month))]
    LedgerConflict {
        /// Month being processed, if any.
        month: Option<Month>,
        /// Pipeline phase.
        phase: Phase,
        /// Ledger rule that failed.
        #[source]
        source: EarningError,
    },

    /// No finalized settlement exists for the month.
    #[error("no finalized settlement for {month} ({phase})")]
    NotFinalized {
        /// Month requested.
        month: Month,
        /// Pipeline phase.
        phase: Phase,
    },
}

fn month_suffix(month: &Option<Month>) -> String {
    month.map(|m| format!(" for {m}")).unwrap_or_default()
}

impl SettlementError {
    /// Classify a port error raised while working on `month` in `phase`.
    pub fn from_store(err: StoreError, month: Option<Month>, phase: Phase) -> Self {
        match err {
            StoreError::AlreadyFinalized { month } | StoreError::Contended { month } => {
                Self::ConcurrencyConflict { month, phase }
            }
            StoreError::Ledger(source) => Self::LedgerConflict {
                month,
                phase,
                source,
            },
            StoreError::Corrupt(reason) => match month {
                Some(month) => Self::DataIntegrity {
                    month,
                    phase,
                    reason,
                },
                None => Self::TransientStore {
                    month,
                    phase,
                    source: StoreError::Corrupt(reason),
                },
            },
            other => Self::TransientStore {
                month,
                phase,
                source: other,
            },
        }
    }

    /// Whether the caller may simply retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::TransientStore { .. }
        )
    }

    /// The phase this error arose in, if it carries one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::DataIntegrity { phase, .. }
            | Self::ConcurrencyConflict { phase, .. }
            | Self::TransientStore { phase, .. }
            | Self::LedgerConflict { phase, .. }
            | Self::NotFinalized { phase, .. } => Some(*phase),
            Self::InsufficientBalance { .. } | Self::InvalidAmount { .. } => {
                Some(Phase::Withdrawal)
            }
        }
    }
}
