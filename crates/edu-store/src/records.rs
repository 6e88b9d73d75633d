//! Subscription and engagement readers over PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use edu_core::Month;
use edu_settlement::{
    EngagementQuery, EngagementReader, EngagementTally, StoreError, Subscription,
    SubscriptionReader,
};

use crate::db_err;
use crate::rows::{SubscriptionRow, TallyRow};

/// Per-owner counts of qualifying events in `[$1, $2)`.
///
/// `$3` is the watch-ratio threshold, `$4` an optional owner filter.
/// Self-activity (`actor_id = owner_id`) is excluded in every branch.
const TALLY_SQL: &str = "
    SELECT owner_id,
           SUM(media_plays)::BIGINT      AS media_plays,
           SUM(downloads)::BIGINT        AS downloads,
           SUM(live_attendances)::BIGINT AS live_attendances
    FROM (
        SELECT owner_id, COUNT(*) AS media_plays, 0::BIGINT AS downloads, 0::BIGINT AS live_attendances
        FROM media_plays
        WHERE occurred_at >= $1 AND occurred_at < $2
          AND actor_id <> owner_id
          AND watch_ratio >= $3
          AND ($4::UUID IS NULL OR owner_id = $4)
        GROUP BY owner_id
        UNION ALL
        SELECT owner_id, 0::BIGINT, COUNT(*), 0::BIGINT
        FROM downloads
        WHERE occurred_at >= $1 AND occurred_at < $2
          AND actor_id <> owner_id
          AND ($4::UUID IS NULL OR owner_id = $4)
        GROUP BY owner_id
        UNION ALL
        SELECT owner_id, 0::BIGINT, 0::BIGINT, COUNT(*)
        FROM live_attendances
        WHERE occurred_at >= $1 AND occurred_at < $2
          AND actor_id <> owner_id
          AND ($4::UUID IS NULL OR owner_id = $4)
        GROUP BY owner_id
    ) per_signal
    GROUP BY owner_id
    ORDER BY owner_id";

/// Read ports over the platform's subscription and engagement tables.
#[derive(Debug, Clone)]
pub struct PgRecords {
    pool: PgPool,
}

impl PgRecords {
    /// Readers over `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionReader for PgRecords {
    async fn subscriptions_overlapping(
        &self,
        month: Month,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, user_id, start_date, expiry_date, plan_price, status, is_yearly
             FROM subscriptions
             WHERE start_date <= $2 AND expiry_date >= $1
             ORDER BY id",
        )
        .bind(month.first_day())
        .bind(month.last_day())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::debug!(%month, rows = rows.len(), "subscriptions loaded");
        rows.into_iter().map(SubscriptionRow::into_subscription).collect()
    }
}

#[async_trait]
impl EngagementReader for PgRecords {
    async fn engagement_tallies(
        &self,
        query: &EngagementQuery,
    ) -> Result<Vec<EngagementTally>, StoreError> {
        let rows = sqlx::query_as::<_, TallyRow>(TALLY_SQL)
            .bind(query.month.start_instant())
            .bind(query.month.end_instant())
            .bind(query.min_watch_ratio)
            .bind(query.owner.map(|o| o.0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(TallyRow::into_tally).collect()
    }
}
