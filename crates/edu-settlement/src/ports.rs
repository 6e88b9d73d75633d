//! # Ports
//!
//! The calculators and the engine talk to storage only through these traits.
//! Two read ports feed the calculators; one write port owns settlements,
//! earnings rows and withdrawals.
//!
//! ## Contract for `SettlementStore` implementations
//!
//! - `open_settlement` creates the month's row in `CALCULATING`, or refreshes
//!   the figures of an existing `CALCULATING` row and returns it with its
//!   original id. It fails with `AlreadyFinalized` if the month is committed.
//! - `finalize_settlement` is the single commit point. In one atomic step it
//!   checks the row is still `CALCULATING` with the expected id, upserts
//!   every earnings row (restating an existing row keeps `withdrawn`), and
//!   flips the status to `FINALIZED`. Any failure leaves nothing written.
//! - `withdraw_fifo` reads balances and applies debits in one atomic step,
//!   and only touches rows of finalized settlements.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use edu_core::{Month, SettlementId, Timestamp, UserId};
use edu_state::{EducatorEarning, SettlementRecord, WithdrawalReceipt};

use crate::error::StoreError;
use crate::records::{SignalCounts, Subscription};

/// Read access to subscription billing records.
#[async_trait]
pub trait SubscriptionReader: Send + Sync {
    /// Every subscription whose coverage overlaps `month`, any status.
    async fn subscriptions_overlapping(&self, month: Month)
        -> Result<Vec<Subscription>, StoreError>;
}

/// Parameters of an engagement aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementQuery {
    /// Month window, `[first instant, next month's first instant)`.
    pub month: Month,
    /// Media plays below this watch ratio are not counted.
    pub min_watch_ratio: f64,
    /// Restrict to one educator's content.
    pub owner: Option<UserId>,
}

/// Qualifying event counts for one educator in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementTally {
    /// Educator owning the content.
    pub owner_id: UserId,
    /// Counts per signal, self-activity and sub-threshold plays excluded.
    pub counts: SignalCounts,
}

/// Read access to engagement events, aggregated per owner.
#[async_trait]
pub trait EngagementReader: Send + Sync {
    /// One tally per educator with at least one qualifying event.
    async fn engagement_tallies(
        &self,
        query: &EngagementQuery,
    ) -> Result<Vec<EngagementTally>, StoreError>;
}

/// Persistence for settlements, earnings and withdrawals.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// The settlement row for `month`, in any status.
    async fn find_settlement(&self, month: Month) -> Result<Option<SettlementRecord>, StoreError>;

    /// Create or refresh the month's `CALCULATING` row.
    async fn open_settlement(&self, record: SettlementRecord)
        -> Result<SettlementRecord, StoreError>;

    /// Atomically write earnings and mark the settlement `FINALIZED`.
    async fn finalize_settlement(
        &self,
        record: SettlementRecord,
        earnings: Vec<EducatorEarning>,
    ) -> Result<SettlementRecord, StoreError>;

    /// All settlement rows, oldest month first.
    async fn list_settlements(&self) -> Result<Vec<SettlementRecord>, StoreError>;

    /// An educator's rows in finalized settlements, oldest month first.
    async fn earnings_for_educator(
        &self,
        educator: UserId,
    ) -> Result<Vec<EducatorEarning>, StoreError>;

    /// Every earnings row of one settlement.
    async fn earnings_for_settlement(
        &self,
        settlement_id: SettlementId,
    ) -> Result<Vec<EducatorEarning>, StoreError>;

    /// Atomically debit `amount` from the educator's rows, oldest first.
    async fn withdraw_fifo(
        &self,
        educator: UserId,
        amount: Decimal,
        at: Timestamp,
    ) -> Result<WithdrawalReceipt, StoreError>;

    /// An educator's withdrawals, oldest first.
    async fn list_withdrawals(&self, educator: UserId)
        -> Result<Vec<WithdrawalReceipt>, StoreError>;
}
