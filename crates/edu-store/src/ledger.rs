//! Settlement, earnings and withdrawal persistence.
//!
//! ## Transactions
//!
//! - `finalize_settlement`: `SELECT … FOR UPDATE` on the month's row, then
//!   earnings upserts, then the status flip, all in one transaction. The
//!   upsert only restates a row when the new earnings cover what was already
//!   withdrawn; otherwise the transaction is dropped (rolled back).
//! - `withdraw_fifo`: locks the educator's finalized earnings rows
//!   (`FOR UPDATE OF e`), plans the debits in memory with
//!   [`edu_state::apply_fifo`], writes them and the receipt, then commits.
//!   Two withdrawals for the same educator serialize on those row locks.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use edu_core::{Month, SettlementId, Timestamp, UserId};
use edu_settlement::{SettlementStore, StoreError};
use edu_state::{
    apply_fifo, EarningError, EducatorEarning, SettlementRecord, SettlementStatus,
    WithdrawalReceipt,
};

use crate::db_err;
use crate::rows::{
    assemble_receipts, count_to_db, AllocationRow, EarningRow, SettlementRow, WithdrawalRow,
    EARNING_COLUMNS, SETTLEMENT_COLUMNS,
};

/// [`SettlementStore`] over PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Ledger over `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementStore for PgLedger {
    async fn find_settlement(&self, month: Month) -> Result<Option<SettlementRecord>, StoreError> {
        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM monthly_settlements WHERE month = $1"
        ))
        .bind(month.first_day())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(SettlementRow::into_record).transpose()
    }

    async fn open_settlement(
        &self,
        record: SettlementRecord,
    ) -> Result<SettlementRecord, StoreError> {
        let f = &record.figures;
        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            "INSERT INTO monthly_settlements
                 (id, month, status, total_subscribers, gross_revenue, total_revenue,
                  total_points, point_value, educator_count)
             VALUES ($1, $2, 'CALCULATING', $3, $4, $5, $6, $7, 0)
             ON CONFLICT (month) DO UPDATE SET
                 total_subscribers = EXCLUDED.total_subscribers,
                 gross_revenue = EXCLUDED.gross_revenue,
                 total_revenue = EXCLUDED.total_revenue,
                 total_points = EXCLUDED.total_points,
                 point_value = EXCLUDED.point_value,
                 updated_at = now()
             WHERE monthly_settlements.status = 'CALCULATING'
             RETURNING {SETTLEMENT_COLUMNS}"
        ))
        .bind(record.id.0)
        .bind(record.month.first_day())
        .bind(count_to_db("total_subscribers", f.total_subscribers)?)
        .bind(f.gross_revenue)
        .bind(f.total_revenue)
        .bind(f.total_points)
        .bind(f.point_value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.into_record(),
            // The conflicting row exists but is no longer CALCULATING.
            None => Err(StoreError::AlreadyFinalized {
                month: record.month,
            }),
        }
    }

    async fn finalize_settlement(
        &self,
        record: SettlementRecord,
        earnings: Vec<EducatorEarning>,
    ) -> Result<SettlementRecord, StoreError> {
        let month = record.month;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM monthly_settlements WHERE month = $1 FOR UPDATE",
        )
        .bind(month.first_day())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        match current {
            None => return Err(StoreError::Contended { month }),
            Some((_, status)) if status == SettlementStatus::Finalized.as_str() => {
                return Err(StoreError::AlreadyFinalized { month })
            }
            Some((id, _)) if id != record.id.0 => return Err(StoreError::Contended { month }),
            Some(_) => {}
        }

        for e in &earnings {
            let written = sqlx::query(
                "INSERT INTO educator_earnings
                     (user_id, settlement_id, month, points, earnings, withdrawn, available_balance)
                 VALUES ($1, $2, $3, $4, $5, 0, $5)
                 ON CONFLICT (user_id, settlement_id) DO UPDATE SET
                     points = EXCLUDED.points,
                     earnings = EXCLUDED.earnings,
                     available_balance = EXCLUDED.earnings - educator_earnings.withdrawn
                 WHERE EXCLUDED.earnings >= educator_earnings.withdrawn",
            )
            .bind(e.educator.0)
            .bind(e.settlement_id.0)
            .bind(month.first_day())
            .bind(e.points)
            .bind(e.earnings)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if written.rows_affected() == 0 {
                let withdrawn: Decimal = sqlx::query_scalar(
                    "SELECT withdrawn FROM educator_earnings
                     WHERE user_id = $1 AND settlement_id = $2",
                )
                .bind(e.educator.0)
                .bind(e.settlement_id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
                tracing::warn!(%month, educator = %e.educator, %withdrawn, earnings = %e.earnings, "restatement rejected");
                return Err(StoreError::Ledger(EarningError::WouldEraseWithdrawals {
                    educator: e.educator,
                    month,
                    earnings: e.earnings,
                    withdrawn,
                }));
            }
        }

        let f = &record.figures;
        let finalized_at = record.finalized_at.unwrap_or_else(Timestamp::now);
        let row = sqlx::query_as::<_, SettlementRow>(&format!(
            "UPDATE monthly_settlements SET
                 status = 'FINALIZED',
                 total_subscribers = $2,
                 gross_revenue = $3,
                 total_revenue = $4,
                 total_points = $5,
                 point_value = $6,
                 educator_count = $7,
                 finalized_at = $8,
                 digest = $9,
                 updated_at = now()
             WHERE id = $1 AND status = 'CALCULATING'
             RETURNING {SETTLEMENT_COLUMNS}"
        ))
        .bind(record.id.0)
        .bind(count_to_db("total_subscribers", f.total_subscribers)?)
        .bind(f.gross_revenue)
        .bind(f.total_revenue)
        .bind(f.total_points)
        .bind(f.point_value)
        .bind(count_to_db("educator_count", earnings.len() as u64)?)
        .bind(*finalized_at.as_datetime())
        .bind(&record.digest)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::Contended { month })?;

        tx.commit().await.map_err(db_err)?;
        row.into_record()
    }

    async fn list_settlements(&self) -> Result<Vec<SettlementRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SettlementRow>(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM monthly_settlements ORDER BY month"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(SettlementRow::into_record).collect()
    }

    async fn earnings_for_educator(
        &self,
        educator: UserId,
    ) -> Result<Vec<EducatorEarning>, StoreError> {
        let rows = sqlx::query_as::<_, EarningRow>(
            "SELECT e.user_id, e.settlement_id, e.month, e.points, e.earnings,
                    e.withdrawn, e.available_balance
             FROM educator_earnings e
             JOIN monthly_settlements s ON s.id = e.settlement_id
             WHERE e.user_id = $1 AND s.status = 'FINALIZED'
             ORDER BY e.month, e.settlement_id",
        )
        .bind(educator.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(EarningRow::into_earning).collect()
    }

    async fn earnings_for_settlement(
        &self,
        settlement_id: SettlementId,
    ) -> Result<Vec<EducatorEarning>, StoreError> {
        let rows = sqlx::query_as::<_, EarningRow>(&format!(
            "SELECT {EARNING_COLUMNS} FROM educator_earnings
             WHERE settlement_id = $1 ORDER BY user_id"
        ))
        .bind(settlement_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(EarningRow::into_earning).collect()
    }

    async fn withdraw_fifo(
        &self,
        educator: UserId,
        amount: Decimal,
        at: Timestamp,
    ) -> Result<WithdrawalReceipt, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut rows: Vec<EducatorEarning> = sqlx::query_as::<_, EarningRow>(
            "SELECT e.user_id, e.settlement_id, e.month, e.points, e.earnings,
                    e.withdrawn, e.available_balance
             FROM educator_earnings e
             JOIN monthly_settlements s ON s.id = e.settlement_id
             WHERE e.user_id = $1 AND s.status = 'FINALIZED'
             ORDER BY e.month, e.settlement_id
             FOR UPDATE OF e",
        )
        .bind(educator.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(EarningRow::into_earning)
        .collect::<Result<_, _>>()?;

        let receipt = apply_fifo(&mut rows, educator, amount, at)?;

        for part in &receipt.allocations {
            sqlx::query(
                "UPDATE educator_earnings SET
                     withdrawn = withdrawn + $3,
                     available_balance = available_balance - $3
                 WHERE user_id = $1 AND settlement_id = $2",
            )
            .bind(educator.0)
            .bind(part.settlement_id.0)
            .bind(part.amount)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query(
            "INSERT INTO withdrawals (id, user_id, amount, processed_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(receipt.id.0)
        .bind(educator.0)
        .bind(receipt.amount)
        .bind(*receipt.processed_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for part in &receipt.allocations {
            sqlx::query(
                "INSERT INTO withdrawal_allocations (withdrawal_id, settlement_id, month, amount)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(receipt.id.0)
            .bind(part.settlement_id.0)
            .bind(part.month.first_day())
            .bind(part.amount)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(%educator, withdrawal = %receipt.id, rows = receipt.allocations.len(), "withdrawal committed");
        Ok(receipt)
    }

    async fn list_withdrawals(
        &self,
        educator: UserId,
    ) -> Result<Vec<WithdrawalReceipt>, StoreError> {
        let withdrawals = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT id, user_id, amount, processed_at FROM withdrawals
             WHERE user_id = $1 ORDER BY processed_at, id",
        )
        .bind(educator.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let allocations = sqlx::query_as::<_, AllocationRow>(
            "SELECT a.withdrawal_id, a.settlement_id, a.month, a.amount
             FROM withdrawal_allocations a
             JOIN withdrawals w ON w.id = a.withdrawal_id
             WHERE w.user_id = $1",
        )
        .bind(educator.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(assemble_receipts(withdrawals, allocations))
    }
}
