//! # Settlement Engine
//!
//! Orchestrates revenue and points into one immutable settlement per
//! calendar month and exposes the educator balance ledger.
//!
//! ## Run Protocol
//!
//! ```text
//! run_settlement(month)
//!   ├─ in-flight guard for month          (second caller: ConcurrencyConflict)
//!   ├─ finalized already?  ──yes──▶ stored summary, no writes
//!   ├─ revenue ∥ points by educator   (tokio::try_join!)
//!   ├─ distributable, total points, point value
//!   ├─ per-educator earnings, rounding excess trimmed
//!   ├─ open_settlement          → CALCULATING row
//!   ├─ allocate earnings        (typestate Settlement<Calculating>)
//!   ├─ finalize + digest        (typestate Settlement<Finalized>)
//!   └─ finalize_settlement      → single atomic commit
//! ```
//!
//! A failure anywhere before the commit leaves the month `CALCULATING`
//! with no earnings rows; calling `run_settlement` again finishes the job.
//! The summary always comes from the committed row, so a fresh run and a
//! cached rerun return identical values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use edu_core::money::check_payable;
use edu_core::{round_money, Month, SettlementConfig, SettlementId, Timestamp, UserId};
use edu_state::{
    settlement_digest, trim_rounding_excess, EarningAllocation, EarningError, EducatorEarning,
    Settlement, SettlementFigures, SettlementRecord, SettlementStatus, WithdrawalReceipt,
};

use crate::error::{Phase, SettlementError, StoreError};
use crate::points::PointsCalculator;
use crate::ports::{EngagementReader, SettlementStore, SubscriptionReader};
use crate::revenue::RevenueCalculator;

// ─── Results ─────────────────────────────────────────────────────────

/// What a settlement run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    /// Settlement identifier.
    pub id: SettlementId,
    /// Month settled.
    pub month: Month,
    /// Lifecycle status.
    pub status: SettlementStatus,
    /// Distinct paying subscribers.
    pub total_subscribers: u64,
    /// Distributable (educator) revenue.
    pub total_revenue: Decimal,
    /// Total prorated subscription revenue.
    pub gross_revenue: Decimal,
    /// Platform-wide points.
    pub total_points: Decimal,
    /// Currency per point.
    pub point_value: Decimal,
    /// Educators credited.
    pub educator_count: u64,
    /// Commit time.
    pub finalized_at: Option<Timestamp>,
    /// Hex SHA-256 of the committed content.
    pub digest: Option<String>,
}

impl From<&SettlementRecord> for SettlementSummary {
    fn from(r: &SettlementRecord) -> Self {
        Self {
            id: r.id,
            month: r.month,
            status: r.status,
            total_subscribers: r.figures.total_subscribers,
            total_revenue: r.figures.total_revenue,
            gross_revenue: r.figures.gross_revenue,
            total_points: r.figures.total_points,
            point_value: r.figures.point_value,
            educator_count: r.educator_count,
            finalized_at: r.finalized_at,
            digest: r.digest.clone(),
        }
    }
}

/// One finalized month in an educator's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyBalance {
    /// Month.
    pub month: Month,
    /// Settlement.
    pub settlement_id: SettlementId,
    /// Points earned.
    pub points: Decimal,
    /// Earnings.
    pub earnings: Decimal,
    /// Already withdrawn.
    pub withdrawn: Decimal,
    /// Still withdrawable.
    pub available_balance: Decimal,
}

impl From<&EducatorEarning> for MonthlyBalance {
    fn from(e: &EducatorEarning) -> Self {
        Self {
            month: e.month,
            settlement_id: e.settlement_id,
            points: e.points,
            earnings: e.earnings,
            withdrawn: e.withdrawn,
            available_balance: e.available_balance,
        }
    }
}

/// An educator's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducatorBalance {
    /// Educator.
    pub educator: UserId,
    /// The in-progress month the estimate covers.
    pub as_of: Month,
    /// Sum of available balances over finalized months. Withdrawable.
    pub finalized_balance: Decimal,
    /// Live estimate for `as_of`. Advisory, never withdrawable.
    pub current_month_estimate: Decimal,
    /// `finalized_balance + current_month_estimate`.
    pub total_balance: Decimal,
    /// Finalized months, oldest first.
    pub monthly_breakdown: Vec<MonthlyBalance>,
}

/// One educator whose recomputed earnings differ from the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningDrift {
    /// Educator.
    pub educator: UserId,
    /// Stored earnings (zero if no row).
    pub stored: Decimal,
    /// Recomputed earnings (zero if no longer active).
    pub recomputed: Decimal,
}

/// Outcome of re-deriving a finalized month from current records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Month verified.
    pub month: Month,
    /// Settlement verified.
    pub settlement_id: SettlementId,
    /// Digest stored at finalization.
    pub stored_digest: Option<String>,
    /// Digest of the recomputation.
    pub recomputed_digest: String,
    /// Stored figures.
    pub stored: SettlementFigures,
    /// Recomputed figures.
    pub recomputed: SettlementFigures,
    /// Per-educator differences, in educator order.
    pub drift: Vec<EarningDrift>,
}

impl VerificationReport {
    /// Whether the source records still produce the committed settlement.
    pub fn matches(&self) -> bool {
        self.stored_digest.as_deref() == Some(self.recomputed_digest.as_str())
    }
}

/// Month figures plus allocations, before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPreview {
    /// Month.
    pub month: Month,
    /// Figures a run would commit.
    pub figures: SettlementFigures,
    /// Earnings a run would allocate, in educator order.
    pub allocations: Vec<EarningAllocation>,
}

// ─── In-flight guard ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct InFlight {
    months: Mutex<BTreeSet<Month>>,
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    month: Month,
}

impl InFlight {
    fn acquire(&self, month: Month) -> Option<InFlightGuard<'_>> {
        if self.months.lock().insert(month) {
            Some(InFlightGuard { owner: self, month })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.months.lock().remove(&self.month);
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

/// Settles months and serves the educator ledger.
pub struct SettlementEngine {
    revenue: RevenueCalculator,
    points: PointsCalculator,
    ledger: Arc<dyn SettlementStore>,
    in_flight: InFlight,
}

impl SettlementEngine {
    /// Engine over explicit sources and ledger.
    pub fn new(
        subscriptions: Arc<dyn SubscriptionReader>,
        engagement: Arc<dyn EngagementReader>,
        ledger: Arc<dyn SettlementStore>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            revenue: RevenueCalculator::new(subscriptions, config.revenue),
            points: PointsCalculator::new(engagement, config.points),
            ledger,
            in_flight: InFlight::default(),
        }
    }

    /// The revenue calculator.
    pub fn revenue(&self) -> &RevenueCalculator {
        &self.revenue
    }

    /// The points calculator.
    pub fn points(&self) -> &PointsCalculator {
        &self.points
    }

    /// Settle `month`, or return the stored summary if it is already final.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` if the month is being settled by another
    ///   caller in this process, or another process committed first.
    /// - `DataIntegrity` on bad source records; nothing is written.
    /// - `TransientStore` on store failures; the month stays `CALCULATING`.
    /// - `LedgerConflict` if a restatement would erase withdrawals.
    pub async fn run_settlement(&self, month: Month) -> Result<SettlementSummary, SettlementError> {
        let Some(_guard) = self.in_flight.acquire(month) else {
            warn!(%month, "settlement already running in this process");
            return Err(SettlementError::ConcurrencyConflict {
                month,
                phase: Phase::Commit,
            });
        };

        if let Some(existing) = self.find(month, Phase::Commit).await? {
            if existing.is_finalized() {
                info!(%month, settlement = %existing.id, "month already finalized, returning stored summary");
                return Ok(SettlementSummary::from(&existing));
            }
            info!(%month, settlement = %existing.id, "resuming interrupted settlement");
        }

        info!(%month, "settlement run started");
        let preview = self.compute(month).await?;
        let commit = |e: StoreError| SettlementError::from_store(e, Some(month), Phase::Commit);

        let opened = self
            .ledger
            .open_settlement(SettlementRecord::from(&Settlement::open(
                SettlementId::new(),
                month,
                preview.figures.clone(),
            )))
            .await
            .map_err(commit)?;

        let mut settlement = Settlement::open(opened.id, month, preview.figures);
        for a in &preview.allocations {
            settlement
                .allocate(a.educator, a.points)
                .map_err(|e| SettlementError::DataIntegrity {
                    month,
                    phase: Phase::Allocation,
                    reason: e.to_string(),
                })?;
        }

        let finalized =
            settlement
                .finalize(Timestamp::now())
                .map_err(|e| SettlementError::DataIntegrity {
                    month,
                    phase: Phase::Commit,
                    reason: e.to_string(),
                })?;
        let earnings: Vec<EducatorEarning> = finalized
            .allocations()
            .iter()
            .map(|a| EducatorEarning::new(a.educator, finalized.id, month, a.points, a.earnings))
            .collect();
        for e in &earnings {
            debug!(%month, educator = %e.educator, points = %e.points, earnings = %e.earnings, "allocated");
        }

        let committed = self
            .ledger
            .finalize_settlement(SettlementRecord::from(&finalized), earnings)
            .await
            .map_err(commit)?;

        info!(
            %month,
            settlement = %committed.id,
            gross_revenue = %committed.figures.gross_revenue,
            total_points = %committed.figures.total_points,
            point_value = %committed.figures.point_value,
            educators = committed.educator_count,
            "settlement finalized"
        );
        Ok(SettlementSummary::from(&committed))
    }

    /// Compute what a run of `month` would commit, without writing.
    pub async fn preview(&self, month: Month) -> Result<SettlementPreview, SettlementError> {
        self.compute(month).await
    }

    /// Stored summary of `month`, any status.
    pub async fn get_settlement(
        &self,
        month: Month,
    ) -> Result<Option<SettlementSummary>, SettlementError> {
        Ok(self
            .find(month, Phase::Commit)
            .await?
            .as_ref()
            .map(SettlementSummary::from))
    }

    /// All stored settlements, oldest month first.
    pub async fn list_settlements(&self) -> Result<Vec<SettlementSummary>, SettlementError> {
        let records = self
            .ledger
            .list_settlements()
            .await
            .map_err(|e| SettlementError::from_store(e, None, Phase::Commit))?;
        Ok(records.iter().map(SettlementSummary::from).collect())
    }

    /// Balance with the current calendar month as the in-progress month.
    pub async fn get_educator_balance(
        &self,
        educator: UserId,
    ) -> Result<EducatorBalance, SettlementError> {
        self.get_educator_balance_as_of(educator, Month::current())
            .await
    }

    /// Balance with `as_of` as the in-progress month.
    ///
    /// The estimate is zero when `as_of` is already finalized, since its
    /// earnings are then part of the finalized balance.
    pub async fn get_educator_balance_as_of(
        &self,
        educator: UserId,
        as_of: Month,
    ) -> Result<EducatorBalance, SettlementError> {
        let rows = self
            .ledger
            .earnings_for_educator(educator)
            .await
            .map_err(|e| SettlementError::from_store(e, None, Phase::Balance))?;
        let finalized_balance: Decimal = rows.iter().map(|r| r.available_balance).sum();

        let already_final = self
            .find(as_of, Phase::Balance)
            .await?
            .is_some_and(|s| s.is_finalized());
        let current_month_estimate = if already_final {
            Decimal::ZERO
        } else {
            self.estimate(educator, as_of).await?
        };

        Ok(EducatorBalance {
            educator,
            as_of,
            finalized_balance,
            current_month_estimate,
            total_balance: finalized_balance + current_month_estimate,
            monthly_breakdown: rows.iter().map(MonthlyBalance::from).collect(),
        })
    }

    /// Withdraw `amount` from the educator's finalized earnings, oldest first.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` unless `amount` is positive with at most two decimal
    /// places. `InsufficientBalance` if it exceeds the finalized balance; no
    /// row is modified in that case.
    pub async fn process_withdrawal(
        &self,
        educator: UserId,
        amount: Decimal,
    ) -> Result<WithdrawalReceipt, SettlementError> {
        let amount = check_payable(amount).map_err(|reason| {
            warn!(%educator, %amount, %reason, "withdrawal rejected");
            SettlementError::InvalidAmount {
                amount: amount.to_string(),
                reason,
            }
        })?;

        match self
            .ledger
            .withdraw_fifo(educator, amount, Timestamp::now())
            .await
        {
            Ok(receipt) => {
                info!(
                    %educator,
                    withdrawal = %receipt.id,
                    %amount,
                    rows = receipt.allocations.len(),
                    "withdrawal applied"
                );
                Ok(receipt)
            }
            Err(StoreError::Ledger(EarningError::InsufficientBalance {
                requested,
                available,
            })) => {
                warn!(%educator, %requested, %available, "withdrawal exceeds finalized balance");
                Err(SettlementError::InsufficientBalance {
                    educator,
                    requested,
                    available,
                })
            }
            Err(e) => Err(SettlementError::from_store(e, None, Phase::Withdrawal)),
        }
    }

    /// An educator's withdrawals, oldest first.
    pub async fn list_withdrawals(
        &self,
        educator: UserId,
    ) -> Result<Vec<WithdrawalReceipt>, SettlementError> {
        self.ledger
            .list_withdrawals(educator)
            .await
            .map_err(|e| SettlementError::from_store(e, None, Phase::Withdrawal))
    }

    /// Recompute a finalized month from current records and compare.
    ///
    /// Read-only. Drift is reported, never written back.
    pub async fn verify_settlement(
        &self,
        month: Month,
    ) -> Result<VerificationReport, SettlementError> {
        let stored = match self.find(month, Phase::Verify).await? {
            Some(s) if s.is_finalized() => s,
            _ => {
                return Err(SettlementError::NotFinalized {
                    month,
                    phase: Phase::Verify,
                })
            }
        };
        let rows = self
            .ledger
            .earnings_for_settlement(stored.id)
            .await
            .map_err(|e| SettlementError::from_store(e, Some(month), Phase::Verify))?;
        let preview = self.compute(month).await?;

        let recomputed_digest = settlement_digest(month, &preview.figures, &preview.allocations)
            .map_err(|e| SettlementError::DataIntegrity {
                month,
                phase: Phase::Verify,
                reason: e.to_string(),
            })?
            .to_hex();

        let mut pairs: BTreeMap<UserId, (Decimal, Decimal)> = BTreeMap::new();
        for r in &rows {
            pairs.entry(r.educator).or_default().0 = r.earnings;
        }
        for a in &preview.allocations {
            pairs.entry(a.educator).or_default().1 = a.earnings;
        }
        let drift: Vec<EarningDrift> = pairs
            .into_iter()
            .filter(|(_, (stored, recomputed))| stored != recomputed)
            .map(|(educator, (stored, recomputed))| EarningDrift {
                educator,
                stored,
                recomputed,
            })
            .collect();

        let report = VerificationReport {
            month,
            settlement_id: stored.id,
            stored_digest: stored.digest.clone(),
            recomputed_digest,
            stored: stored.figures.clone(),
            recomputed: preview.figures,
            drift,
        };
        if report.matches() {
            info!(%month, "settlement verified");
        } else {
            warn!(%month, drifted = report.drift.len(), "settlement drift detected");
        }
        Ok(report)
    }

    // ── internals ────────────────────────────────────────────────────

    async fn find(
        &self,
        month: Month,
        phase: Phase,
    ) -> Result<Option<SettlementRecord>, SettlementError> {
        self.ledger
            .find_settlement(month)
            .await
            .map_err(|e| SettlementError::from_store(e, Some(month), phase))
    }

    async fn compute(&self, month: Month) -> Result<SettlementPreview, SettlementError> {
        let (revenue, by_educator) = tokio::try_join!(
            self.revenue.compute_monthly_revenue(month),
            self.points.points_by_educator(month),
        )?;

        // The platform total is the sum of the rows actually paid, so the
        // point value never spreads revenue over points nobody holds.
        let total_points: Decimal = by_educator.values().copied().sum();
        let distributable = self
            .revenue
            .compute_distributable_revenue(revenue.total_revenue);
        let point_value = SettlementFigures::derive_point_value(distributable, total_points);
        let figures = SettlementFigures {
            total_subscribers: revenue.subscriber_count,
            gross_revenue: revenue.total_revenue,
            total_revenue: distributable,
            total_points,
            point_value,
        };

        let mut allocations: Vec<EarningAllocation> = by_educator
            .into_iter()
            .filter(|(_, points)| *points > Decimal::ZERO)
            .map(|(educator, points)| EarningAllocation {
                educator,
                points,
                earnings: round_money(points * point_value),
            })
            .collect();
        trim_rounding_excess(&mut allocations, point_value, distributable);

        Ok(SettlementPreview {
            month,
            figures,
            allocations,
        })
    }

    async fn estimate(&self, educator: UserId, month: Month) -> Result<Decimal, SettlementError> {
        let (revenue, total, mine) = tokio::try_join!(
            self.revenue.compute_monthly_revenue(month),
            self.points.compute_total_points_for_month(month),
            self.points.compute_educator_points_for_month(educator, month),
        )?;
        let distributable = self
            .revenue
            .compute_distributable_revenue(revenue.total_revenue);
        let point_value = SettlementFigures::derive_point_value(distributable, total.total_points);
        Ok(round_money(mine.total_points * point_value))
    }
}
