//! # Points Calculator
//!
//! Converts per-educator engagement tallies into weighted points:
//!
//! | Signal | Default weight | Qualifies when |
//! |--------|----------------|----------------|
//! | media play | 0.2 | `watch_ratio >= min_watch_ratio` (0.30) |
//! | download | 3 | always |
//! | live attendance | 5 | always |
//!
//! Self-activity never qualifies. Filtering happens in the
//! [`EngagementReader`]; in-memory readers use [`tally_events`], which
//! applies [`EngagementEvent::qualifies`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use edu_core::{round_points, Month, PointsConfig, UserId};

use crate::error::{Phase, SettlementError};
use crate::ports::{EngagementQuery, EngagementReader, EngagementTally};
use crate::records::{EngagementEvent, Signal, SignalCounts};

/// Count and points for one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPoints {
    /// Qualifying events.
    pub count: u64,
    /// `count * weight`.
    pub points: Decimal,
}

/// Points for a month, platform-wide or for one educator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsSummary {
    /// Month.
    pub month: Month,
    /// Weighted total, rounded to two decimals.
    pub total_points: Decimal,
    /// Per-signal detail.
    pub breakdown: BTreeMap<Signal, SignalPoints>,
}

/// Aggregate qualifying events into per-owner tallies.
///
/// Events outside the query month, self-activity, sub-threshold plays and
/// (when the query names one) other owners' events are skipped.
pub fn tally_events<'a>(
    events: impl IntoIterator<Item = &'a EngagementEvent>,
    query: &EngagementQuery,
) -> Vec<EngagementTally> {
    let mut by_owner: BTreeMap<UserId, SignalCounts> = BTreeMap::new();
    for event in events {
        if !query.month.contains_instant(&event.timestamp) {
            continue;
        }
        if query.owner.is_some_and(|owner| owner != event.owner_id) {
            continue;
        }
        if !event.qualifies(query.min_watch_ratio) {
            continue;
        }
        by_owner
            .entry(event.owner_id)
            .or_default()
            .record(event.kind.signal());
    }
    by_owner
        .into_iter()
        .map(|(owner_id, counts)| EngagementTally { owner_id, counts })
        .collect()
}

/// Computes weighted engagement points from engagement tallies.
pub struct PointsCalculator {
    engagement: Arc<dyn EngagementReader>,
    config: PointsConfig,
}

impl PointsCalculator {
    /// Calculator over an engagement source.
    pub fn new(engagement: Arc<dyn EngagementReader>, config: PointsConfig) -> Self {
        Self { engagement, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &PointsConfig {
        &self.config
    }

    /// Weight for one signal.
    pub fn weight(&self, signal: Signal) -> Decimal {
        let w = &self.config.weights;
        match signal {
            Signal::MediaPlay => w.media_play,
            Signal::Download => w.download,
            Signal::LiveAttendance => w.live_attendance,
        }
    }

    /// Unrounded weighted points for a set of counts.
    pub fn weigh(&self, counts: &SignalCounts) -> Decimal {
        Signal::ALL
            .iter()
            .map(|s| Decimal::from(counts.get(*s)) * self.weight(*s))
            .sum()
    }

    /// Platform-wide points for `month`.
    pub async fn compute_total_points_for_month(
        &self,
        month: Month,
    ) -> Result<PointsSummary, SettlementError> {
        let tallies = self.tallies(month, None).await?;
        let mut counts = SignalCounts::default();
        for tally in &tallies {
            counts.merge(&tally.counts);
        }
        Ok(self.summarize(month, &counts))
    }

    /// Points earned by one educator's content in `month`.
    pub async fn compute_educator_points_for_month(
        &self,
        educator: UserId,
        month: Month,
    ) -> Result<PointsSummary, SettlementError> {
        let tallies = self.tallies(month, Some(educator)).await?;
        let mut counts = SignalCounts::default();
        for tally in tallies.iter().filter(|t| t.owner_id == educator) {
            counts.merge(&tally.counts);
        }
        Ok(self.summarize(month, &counts))
    }

    /// Educators with at least one qualifying event in `month`.
    pub async fn list_active_educators_for_month(
        &self,
        month: Month,
    ) -> Result<BTreeSet<UserId>, SettlementError> {
        Ok(self
            .tallies(month, None)
            .await?
            .into_iter()
            .filter(|t| !t.counts.is_empty())
            .map(|t| t.owner_id)
            .collect())
    }

    /// Rounded points of every active educator in `month`, from one read.
    ///
    /// Keyed by exactly the set [`list_active_educators_for_month`] returns,
    /// so settlement allocates over the active educators without a second
    /// read. An educator whose only signals carry zero weight maps to zero.
    ///
    /// [`list_active_educators_for_month`]: Self::list_active_educators_for_month
    pub async fn points_by_educator(
        &self,
        month: Month,
    ) -> Result<BTreeMap<UserId, Decimal>, SettlementError> {
        let mut merged: BTreeMap<UserId, SignalCounts> = BTreeMap::new();
        for tally in self.tallies(month, None).await? {
            merged.entry(tally.owner_id).or_default().merge(&tally.counts);
        }
        Ok(merged
            .into_iter()
            .filter(|(_, counts)| !counts.is_empty())
            .map(|(owner, counts)| (owner, round_points(self.weigh(&counts))))
            .collect())
    }

    async fn tallies(
        &self,
        month: Month,
        owner: Option<UserId>,
    ) -> Result<Vec<EngagementTally>, SettlementError> {
        let query = EngagementQuery {
            month,
            min_watch_ratio: self.config.min_watch_ratio,
            owner,
        };
        self.engagement
            .engagement_tallies(&query)
            .await
            .map_err(|e| SettlementError::from_store(e, Some(month), Phase::Points))
    }

    fn summarize(&self, month: Month, counts: &SignalCounts) -> PointsSummary {
        let breakdown = Signal::ALL
            .iter()
            .map(|s| {
                let count = counts.get(*s);
                let points = Decimal::from(count) * self.weight(*s);
                (*s, SignalPoints { count, points })
            })
            .collect();
        PointsSummary {
            month,
            total_points: round_points(self.weigh(counts)),
            breakdown,
        }
    }
}
