//! Row types for SQLx mapping and their conversion to domain types.
//!
//! Conversions are fallible: a status string or count that does not decode
//! is reported as [`StoreError::Corrupt`] rather than guessed at.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use edu_core::{Month, SettlementId, SubscriptionId, Timestamp, UserId, WithdrawalId};
use edu_settlement::{
    EngagementTally, SignalCounts, StoreError, Subscription, SubscriptionStatus,
};
use edu_state::{
    Allocation, EducatorEarning, SettlementFigures, SettlementRecord, SettlementStatus,
    WithdrawalReceipt,
};

/// Columns selected for [`SettlementRow`].
pub const SETTLEMENT_COLUMNS: &str = "id, month, status, total_subscribers, gross_revenue, \
     total_revenue, total_points, point_value, educator_count, finalized_at, digest";

/// Columns selected for [`EarningRow`].
pub const EARNING_COLUMNS: &str =
    "user_id, settlement_id, month, points, earnings, withdrawn, available_balance";

fn count_from_db(field: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {field}: {value}")))
}

/// Convert a count for storage in a BIGINT column.
pub fn count_to_db(field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{field} {value} exceeds BIGINT range")))
}

/// A `subscriptions` row.
#[derive(Debug, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub start_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub plan_price: Option<Decimal>,
    pub status: String,
    pub is_yearly: bool,
}

impl SubscriptionRow {
    pub fn into_subscription(self) -> Result<Subscription, StoreError> {
        let status = SubscriptionStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "subscription {} has unknown status {:?}",
                self.id, self.status
            ))
        })?;
        Ok(Subscription {
            id: SubscriptionId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            start_date: self.start_date,
            expiry_date: self.expiry_date,
            plan_price: self.plan_price,
            status,
            is_yearly: self.is_yearly,
        })
    }
}

/// One owner's aggregated engagement counts.
#[derive(Debug, sqlx::FromRow)]
pub struct TallyRow {
    pub owner_id: Uuid,
    pub media_plays: i64,
    pub downloads: i64,
    pub live_attendances: i64,
}

impl TallyRow {
    pub fn into_tally(self) -> Result<EngagementTally, StoreError> {
        Ok(EngagementTally {
            owner_id: UserId::from_uuid(self.owner_id),
            counts: SignalCounts {
                media_plays: count_from_db("media_plays", self.media_plays)?,
                downloads: count_from_db("downloads", self.downloads)?,
                live_attendances: count_from_db("live_attendances", self.live_attendances)?,
            },
        })
    }
}

/// A `monthly_settlements` row.
#[derive(Debug, sqlx::FromRow)]
pub struct SettlementRow {
    pub id: Uuid,
    pub month: NaiveDate,
    pub status: String,
    pub total_subscribers: i64,
    pub gross_revenue: Decimal,
    pub total_revenue: Decimal,
    pub total_points: Decimal,
    pub point_value: Decimal,
    pub educator_count: i64,
    pub finalized_at: Option<DateTime<Utc>>,
    pub digest: Option<String>,
}

impl SettlementRow {
    pub fn into_record(self) -> Result<SettlementRecord, StoreError> {
        let status = SettlementStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "settlement {} has unknown status {:?}",
                self.id, self.status
            ))
        })?;
        Ok(SettlementRecord {
            id: SettlementId::from_uuid(self.id),
            month: Month::containing(self.month),
            figures: SettlementFigures {
                total_subscribers: count_from_db("total_subscribers", self.total_subscribers)?,
                gross_revenue: self.gross_revenue,
                total_revenue: self.total_revenue,
                total_points: self.total_points,
                point_value: self.point_value,
            },
            status,
            finalized_at: self.finalized_at.map(Timestamp::from_utc),
            digest: self.digest,
            educator_count: count_from_db("educator_count", self.educator_count)?,
        })
    }
}

/// An `educator_earnings` row.
#[derive(Debug, sqlx::FromRow)]
pub struct EarningRow {
    pub user_id: Uuid,
    pub settlement_id: Uuid,
    pub month: NaiveDate,
    pub points: Decimal,
    pub earnings: Decimal,
    pub withdrawn: Decimal,
    pub available_balance: Decimal,
}

impl EarningRow {
    /// Convert, checking the ledger invariant.
    pub fn into_earning(self) -> Result<EducatorEarning, StoreError> {
        let earning = EducatorEarning {
            educator: UserId::from_uuid(self.user_id),
            settlement_id: SettlementId::from_uuid(self.settlement_id),
            month: Month::containing(self.month),
            points: self.points,
            earnings: self.earnings,
            withdrawn: self.withdrawn,
            available_balance: self.available_balance,
        };
        earning
            .check_invariant()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(earning)
    }
}

/// A `withdrawals` row.
#[derive(Debug, sqlx::FromRow)]
pub struct WithdrawalRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// A `withdrawal_allocations` row.
#[derive(Debug, sqlx::FromRow)]
pub struct AllocationRow {
    pub withdrawal_id: Uuid,
    pub settlement_id: Uuid,
    pub month: NaiveDate,
    pub amount: Decimal,
}

/// Assemble receipts from withdrawal rows and all their allocation rows.
///
/// Receipt order follows `withdrawals`; allocations are ordered by month.
pub fn assemble_receipts(
    withdrawals: Vec<WithdrawalRow>,
    allocations: Vec<AllocationRow>,
) -> Vec<WithdrawalReceipt> {
    withdrawals
        .into_iter()
        .map(|w| {
            let mut parts: Vec<Allocation> = allocations
                .iter()
                .filter(|a| a.withdrawal_id == w.id)
                .map(|a| Allocation {
                    settlement_id: SettlementId::from_uuid(a.settlement_id),
                    month: Month::containing(a.month),
                    amount: a.amount,
                })
                .collect();
            parts.sort_by(|a, b| {
                a.month
                    .cmp(&b.month)
                    .then_with(|| a.settlement_id.cmp(&b.settlement_id))
            });
            WithdrawalReceipt {
                id: WithdrawalId::from_uuid(w.id),
                educator: UserId::from_uuid(w.user_id),
                amount: w.amount,
                allocations: parts,
                processed_at: Timestamp::from_utc(w.processed_at),
            }
        })
        .collect()
}
