//! # Settlement Typestate Machine
//!
//! ```text
//! open() ──▶ Calculating ──allocate()*──▶ Calculating ──finalize()──▶ Finalized
//! ```
//!
//! `Finalized` is terminal. There is no reopen transition: recomputing a
//! closed month is a read-only verification, never a rewrite.
//!
//! The following does not compile because `Settlement<Finalized>` has no
//! `allocate()` method:
//!
//! ```compile_fail
//! use edu_core::{Month, SettlementId, Timestamp, UserId};
//! use edu_state::settlement::*;
//! use rust_decimal::Decimal;
//!
//! let open = Settlement::open(SettlementId::new(), Month::new(2026, 1).unwrap(), SettlementFigures::default());
//! let mut done = open.finalize(Timestamp::now()).unwrap();
//! done.allocate(UserId::new(), Decimal::ONE);
//! ```

use std::marker::PhantomData;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edu_core::money::MONEY_SCALE;
use edu_core::{
    round_money, sha256_digest, CanonicalBytes, CanonicalizationError, ContentDigest, Month,
    SettlementId, Timestamp, UserId,
};

// ─── State Types ─────────────────────────────────────────────────────

/// Settlement state: figures computed, earnings being allocated.
#[derive(Debug, Clone, Copy)]
pub struct Calculating;

/// Settlement state: committed and immutable (terminal).
#[derive(Debug, Clone, Copy)]
pub struct Finalized;

mod private {
    pub trait Sealed {}
    impl Sealed for super::Calculating {}
    impl Sealed for super::Finalized {}
}

/// Marker trait for settlement states. Sealed.
pub trait SettlementState: private::Sealed + std::fmt::Debug {
    /// Runtime status corresponding to this state.
    fn status() -> SettlementStatus;
}

impl SettlementState for Calculating {
    fn status() -> SettlementStatus {
        SettlementStatus::Calculating
    }
}

impl SettlementState for Finalized {
    fn status() -> SettlementStatus {
        SettlementStatus::Finalized
    }
}

/// Runtime settlement status for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    /// Computation in progress or interrupted; safe to re-run.
    Calculating,
    /// Committed; immutable.
    Finalized,
}

impl SettlementStatus {
    /// Canonical status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculating => "CALCULATING",
            Self::Finalized => "FINALIZED",
        }
    }

    /// Parse the canonical status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CALCULATING" => Some(Self::Calculating),
            "FINALIZED" => Some(Self::Finalized),
            _ => None,
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized)
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Figures and Allocations ─────────────────────────────────────────

/// The month-level numbers a settlement commits to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFigures {
    /// Distinct paying subscribers in the month.
    pub total_subscribers: u64,
    /// Total prorated subscription revenue, rounded once.
    pub gross_revenue: Decimal,
    /// Educator share of `gross_revenue` (distributable revenue).
    pub total_revenue: Decimal,
    /// Platform-wide engagement points.
    pub total_points: Decimal,
    /// Currency per point; zero when there were no points.
    pub point_value: Decimal,
}

impl SettlementFigures {
    /// Derive the point value from distributable revenue and total points.
    ///
    /// Zero points yields a zero point value, never a division fault.
    pub fn derive_point_value(distributable: Decimal, total_points: Decimal) -> Decimal {
        if total_points > Decimal::ZERO {
            distributable / total_points
        } else {
            Decimal::ZERO
        }
    }
}

/// One educator's earnings within a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningAllocation {
    /// The educator credited.
    pub educator: UserId,
    /// Points earned in the month.
    pub points: Decimal,
    /// `round(points * point_value, 2)`, less any cent taken back by
    /// [`trim_rounding_excess`].
    pub earnings: Decimal,
}

/// Take back rounding overshoot so allocations never sum past `distributable`.
///
/// Rows are rounded half away from zero one by one, so their sum can land a
/// few cents above the distributable revenue. The excess comes back one cent
/// at a time from the rows rounded up furthest, ties to the lower educator id.
pub fn trim_rounding_excess(
    allocations: &mut [EarningAllocation],
    point_value: Decimal,
    distributable: Decimal,
) {
    let paid: Decimal = allocations.iter().map(|a| a.earnings).sum();
    let mut excess = paid - distributable;
    if excess <= Decimal::ZERO {
        return;
    }
    let cent = Decimal::new(1, MONEY_SCALE);
    let residual = |a: &EarningAllocation| a.earnings - a.points * point_value;
    let mut order: Vec<usize> = (0..allocations.len()).collect();
    order.sort_by(|&i, &j| {
        let (a, b) = (&allocations[i], &allocations[j]);
        residual(b)
            .cmp(&residual(a))
            .then_with(|| a.educator.cmp(&b.educator))
    });
    for i in order {
        if excess <= Decimal::ZERO {
            break;
        }
        let row = &mut allocations[i];
        if row.earnings >= cent {
            row.earnings -= cent;
            excess -= cent;
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from settlement lifecycle operations.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Attempted transition not allowed by the state machine.
    #[error("invalid settlement transition for {month}: {from} -> {to}")]
    InvalidTransition {
        /// Settlement month.
        month: Month,
        /// Current status.
        from: SettlementStatus,
        /// Attempted status.
        to: SettlementStatus,
    },

    /// The same educator was allocated twice.
    #[error("educator {educator} already allocated in settlement for {month}")]
    DuplicateAllocation {
        /// Settlement month.
        month: Month,
        /// Educator allocated twice.
        educator: UserId,
    },

    /// The settlement digest could not be computed.
    #[error("settlement digest failed: {0}")]
    Digest(#[from] CanonicalizationError),
}

// ─── The Settlement ──────────────────────────────────────────────────

/// A monthly settlement, parameterized by its lifecycle state.
#[derive(Debug, Clone)]
pub struct Settlement<S: SettlementState> {
    /// Settlement identifier.
    pub id: SettlementId,
    /// Month key.
    pub month: Month,
    /// Month-level figures.
    pub figures: SettlementFigures,
    allocations: Vec<EarningAllocation>,
    finalized_at: Option<Timestamp>,
    digest: Option<ContentDigest>,
    _state: PhantomData<S>,
}

impl<S: SettlementState> Settlement<S> {
    /// Current status.
    pub fn status(&self) -> SettlementStatus {
        S::status()
    }

    /// Allocations so far, in educator order.
    pub fn allocations(&self) -> &[EarningAllocation] {
        &self.allocations
    }

    /// Number of educators credited.
    pub fn educator_count(&self) -> usize {
        self.allocations.len()
    }
}

impl Settlement<Calculating> {
    /// Open a settlement for `month` with computed figures.
    pub fn open(id: SettlementId, month: Month, figures: SettlementFigures) -> Self {
        Self {
            id,
            month,
            figures,
            allocations: Vec::new(),
            finalized_at: None,
            digest: None,
            _state: PhantomData,
        }
    }

    /// Credit an educator with `points` at this settlement's point value.
    ///
    /// Returns `Ok(None)` when `points` is zero: no zero-value row is
    /// created.
    pub fn allocate(
        &mut self,
        educator: UserId,
        points: Decimal,
    ) -> Result<Option<&EarningAllocation>, SettlementError> {
        if points <= Decimal::ZERO {
            return Ok(None);
        }
        let pos = match self
            .allocations
            .binary_search_by(|a| a.educator.cmp(&educator))
        {
            Ok(_) => {
                return Err(SettlementError::DuplicateAllocation {
                    month: self.month,
                    educator,
                })
            }
            Err(pos) => pos,
        };
        let earnings = round_money(points * self.figures.point_value);
        self.allocations.insert(
            pos,
            EarningAllocation {
                educator,
                points,
                earnings,
            },
        );
        Ok(self.allocations.get(pos))
    }

    /// Commit (CALCULATING → FINALIZED), stamping time and digest.
    ///
    /// Rounding excess is trimmed first, so the committed earnings never
    /// exceed the distributable revenue.
    pub fn finalize(mut self, at: Timestamp) -> Result<Settlement<Finalized>, SettlementError> {
        trim_rounding_excess(
            &mut self.allocations,
            self.figures.point_value,
            self.figures.total_revenue,
        );
        let digest = settlement_digest(self.month, &self.figures, &self.allocations)?;
        Ok(Settlement {
            id: self.id,
            month: self.month,
            figures: self.figures,
            allocations: self.allocations,
            finalized_at: Some(at),
            digest: Some(digest),
            _state: PhantomData,
        })
    }
}

impl Settlement<Finalized> {
    /// When the settlement was committed.
    pub fn finalized_at(&self) -> Option<Timestamp> {
        self.finalized_at
    }

    /// Fingerprint of month, figures and allocations.
    pub fn digest(&self) -> Option<ContentDigest> {
        self.digest
    }
}

/// Fingerprint a settlement's committed content.
///
/// Allocations are hashed in educator order regardless of input order.
pub fn settlement_digest(
    month: Month,
    figures: &SettlementFigures,
    allocations: &[EarningAllocation],
) -> Result<ContentDigest, CanonicalizationError> {
    #[derive(Serialize)]
    struct DigestInput<'a> {
        month: Month,
        figures: &'a SettlementFigures,
        allocations: Vec<&'a EarningAllocation>,
    }

    let mut sorted: Vec<&EarningAllocation> = allocations.iter().collect();
    sorted.sort_by(|a, b| a.educator.cmp(&b.educator));
    let canonical = CanonicalBytes::new(&DigestInput {
        month,
        figures,
        allocations: sorted,
    })?;
    Ok(sha256_digest(&canonical))
}

// ─── SettlementRecord: Runtime Form for Persistence ─────────────────

/// A settlement row as stored, state known only at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Settlement identifier.
    pub id: SettlementId,
    /// Unique month key.
    pub month: Month,
    /// Month-level figures.
    pub figures: SettlementFigures,
    /// Current status.
    pub status: SettlementStatus,
    /// Set when finalized.
    pub finalized_at: Option<Timestamp>,
    /// Hex digest, set when finalized.
    pub digest: Option<String>,
    /// Number of educators credited; zero while calculating.
    pub educator_count: u64,
}

impl SettlementRecord {
    /// Whether the record is committed.
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    /// Runtime-checked transition. Only CALCULATING → FINALIZED is legal.
    pub fn try_transition(&mut self, to: SettlementStatus) -> Result<(), SettlementError> {
        if self.status.is_terminal() || to != SettlementStatus::Finalized {
            return Err(SettlementError::InvalidTransition {
                month: self.month,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

impl From<&Settlement<Calculating>> for SettlementRecord {
    fn from(s: &Settlement<Calculating>) -> Self {
        Self {
            id: s.id,
            month: s.month,
            figures: s.figures.clone(),
            status: SettlementStatus::Calculating,
            finalized_at: None,
            digest: None,
            educator_count: 0,
        }
    }
}

impl From<&Settlement<Finalized>> for SettlementRecord {
    fn from(s: &Settlement<Finalized>) -> Self {
        Self {
            id: s.id,
            month: s.month,
            figures: s.figures.clone(),
            status: SettlementStatus::Finalized,
            finalized_at: s.finalized_at,
            digest: s.digest.map(|d| d.to_hex()),
            educator_count: s.allocations.len() as u64,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
