//! # Source Records
//!
//! Subscriptions and engagement events as read from the platform's stores.
//! Both are read-only to the settlement engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use edu_core::{GracePeriodPolicy, Month, SubscriptionId, UserId};

// ─── Subscriptions ───────────────────────────────────────────────────

/// Billing status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created but not yet paid.
    Pending,
    /// Paid and current.
    Active,
    /// Past expiry, inside the renewal grace window.
    Grace,
    /// Ran to its expiry date.
    Expired,
    /// Cancelled; paid through its expiry date.
    Cancelled,
    /// Payment returned.
    Refunded,
}

impl SubscriptionStatus {
    /// Lowercase status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Grace => "grace",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Parse a status name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "grace" => Some(Self::Grace),
            "expired" => Some(Self::Expired),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether a subscription in this status earns revenue for the days it
    /// covers.
    pub fn is_revenue_generating(&self, grace: GracePeriodPolicy) -> bool {
        match self {
            Self::Active | Self::Expired | Self::Cancelled => true,
            Self::Grace => grace == GracePeriodPolicy::Include,
            Self::Pending | Self::Refunded => false,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learner's paid subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Subscribing learner.
    pub user_id: UserId,
    /// First covered day.
    pub start_date: NaiveDate,
    /// Last covered day, inclusive.
    pub expiry_date: NaiveDate,
    /// Price paid for the plan. `None` falls back to the catalog price.
    #[serde(default)]
    pub plan_price: Option<Decimal>,
    /// Billing status.
    pub status: SubscriptionStatus,
    /// Yearly plans prorate at one twelfth of their price per month.
    #[serde(default)]
    pub is_yearly: bool,
}

impl Subscription {
    /// `start ≤ monthEnd AND expiry ≥ monthStart`.
    pub fn overlaps(&self, month: Month) -> bool {
        self.start_date <= month.last_day() && self.expiry_date >= month.first_day()
    }

    /// Covered days inside `month`, both ends inclusive. Zero without overlap.
    pub fn active_days(&self, month: Month) -> u32 {
        if !self.overlaps(month) {
            return 0;
        }
        let start = self.start_date.max(month.first_day());
        let end = self.expiry_date.min(month.last_day());
        let days = (end - start).num_days() + 1;
        u32::try_from(days).unwrap_or(0)
    }
}

// ─── Engagement ──────────────────────────────────────────────────────

/// The three engagement signals that earn points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// A learner played an educator's media.
    MediaPlay,
    /// A learner downloaded an educator's resource.
    Download,
    /// A learner attended an educator's live session.
    LiveAttendance,
}

impl Signal {
    /// All signals in reporting order.
    pub const ALL: [Signal; 3] = [Signal::MediaPlay, Signal::Download, Signal::LiveAttendance];

    /// Lowercase signal name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MediaPlay => "media_play",
            Self::Download => "download",
            Self::LiveAttendance => "live_attendance",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific part of an engagement event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngagementKind {
    /// Media playback, with the fraction of the media watched.
    MediaPlay {
        /// Watched fraction in `0..=1`.
        watch_ratio: f64,
    },
    /// Resource download.
    Download,
    /// Live session attendance.
    LiveAttendance,
}

impl EngagementKind {
    /// Which signal this event counts toward.
    pub fn signal(&self) -> Signal {
        match self {
            Self::MediaPlay { .. } => Signal::MediaPlay,
            Self::Download => Signal::Download,
            Self::LiveAttendance => Signal::LiveAttendance,
        }
    }
}

/// A timestamped learner action against an educator's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    /// The learner who acted.
    pub actor_id: UserId,
    /// The educator who owns the content or session.
    pub owner_id: UserId,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EngagementKind,
}

impl EngagementEvent {
    /// Educators engaging with their own content earn nothing.
    pub fn is_self_activity(&self) -> bool {
        self.actor_id == self.owner_id
    }

    /// Whether this event earns points: not self-activity, and for media
    /// plays a watch ratio at or above `min_watch_ratio`.
    pub fn qualifies(&self, min_watch_ratio: f64) -> bool {
        if self.is_self_activity() {
            return false;
        }
        match self.kind {
            EngagementKind::MediaPlay { watch_ratio } => watch_ratio >= min_watch_ratio,
            EngagementKind::Download | EngagementKind::LiveAttendance => true,
        }
    }
}

/// Qualifying event counts per signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCounts {
    /// Qualifying media plays.
    pub media_plays: u64,
    /// Downloads.
    pub downloads: u64,
    /// Live attendances.
    pub live_attendances: u64,
}

impl SignalCounts {
    /// Count one event of `signal`.
    pub fn record(&mut self, signal: Signal) {
        match signal {
            Signal::MediaPlay => self.media_plays += 1,
            Signal::Download => self.downloads += 1,
            Signal::LiveAttendance => self.live_attendances += 1,
        }
    }

    /// Count for one signal.
    pub fn get(&self, signal: Signal) -> u64 {
        match signal {
            Signal::MediaPlay => self.media_plays,
            Signal::Download => self.downloads,
            Signal::LiveAttendance => self.live_attendances,
        }
    }

    /// Add another set of counts.
    pub fn merge(&mut self, other: &SignalCounts) {
        self.media_plays += other.media_plays;
        self.downloads += other.downloads;
        self.live_attendances += other.live_attendances;
    }

    /// Total qualifying events.
    pub fn total(&self) -> u64 {
        self.media_plays + self.downloads + self.live_attendances
    }

    /// No qualifying events at all.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sub(start: (i32, u32, u32), expiry: (i32, u32, u32)) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(expiry.0, expiry.1, expiry.2).unwrap(),
            plan_price: None,
            status: SubscriptionStatus::Active,
            is_yearly: false,
        }
    }

    #[test]
    fn overlap_is_inclusive_at_both_ends() {
        let jan = Month::new(2026, 1).unwrap();
        assert!(sub((2026, 1, 31), (2026, 3, 1)).overlaps(jan));
        assert!(sub((2025, 11, 1), (2026, 1, 1)).overlaps(jan));
        assert!(!sub((2026, 2, 1), (2026, 3, 1)).overlaps(jan));
        assert!(!sub((2025, 11, 1), (2025, 12, 31)).overlaps(jan));
    }

    #[test]
    fn active_days_clip_to_month() {
        let feb = Month::new(2026, 2).unwrap();
        assert_eq!(sub((2026, 1, 1), (2026, 12, 31)).active_days(feb), 28);
        assert_eq!(sub((2026, 2, 15), (2026, 12, 31)).active_days(feb), 14);
        assert_eq!(sub((2026, 1, 1), (2026, 2, 1)).active_days(feb), 1);
        assert_eq!(sub((2026, 3, 1), (2026, 4, 1)).active_days(feb), 0);
    }

    #[test]
    fn revenue_statuses() {
        use GracePeriodPolicy::*;
        assert!(SubscriptionStatus::Active.is_revenue_generating(Exclude));
        assert!(SubscriptionStatus::Cancelled.is_revenue_generating(Exclude));
        assert!(SubscriptionStatus::Expired.is_revenue_generating(Exclude));
        assert!(!SubscriptionStatus::Pending.is_revenue_generating(Include));
        assert!(!SubscriptionStatus::Refunded.is_revenue_generating(Include));
        assert!(!SubscriptionStatus::Grace.is_revenue_generating(Exclude));
        assert!(SubscriptionStatus::Grace.is_revenue_generating(Include));
    }

    #[test]
    fn status_parse_accepts_both_spellings() {
        assert_eq!(
            SubscriptionStatus::parse("Canceled"),
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(SubscriptionStatus::parse("bogus"), None);
    }

    fn event(actor: UserId, owner: UserId, kind: EngagementKind) -> EngagementEvent {
        EngagementEvent {
            actor_id: actor,
            owner_id: owner,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            kind,
        }
    }

    #[test]
    fn watch_ratio_threshold_is_binary() {
        let (learner, educator) = (UserId::new(), UserId::new());
        let at = |r| event(learner, educator, EngagementKind::MediaPlay { watch_ratio: r });
        assert!(!at(0.29).qualifies(0.30));
        assert!(at(0.30).qualifies(0.30));
        assert!(at(1.0).qualifies(0.30));
    }

    #[test]
    fn self_activity_never_qualifies() {
        let educator = UserId::new();
        for kind in [
            EngagementKind::MediaPlay { watch_ratio: 1.0 },
            EngagementKind::Download,
            EngagementKind::LiveAttendance,
        ] {
            let e = event(educator, educator, kind);
            assert!(e.is_self_activity());
            assert!(!e.qualifies(0.0));
        }
    }

    #[test]
    fn event_json_shape() {
        let e = event(
            UserId::new(),
            UserId::new(),
            EngagementKind::MediaPlay { watch_ratio: 0.5 },
        );
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["kind"]["type"], "media_play");
        assert_eq!(value["kind"]["watch_ratio"], 0.5);

        let download: EngagementKind = serde_json::from_str(r#"{"type":"download"}"#).unwrap();
        assert_eq!(download.signal(), Signal::Download);
    }

    #[test]
    fn counts_merge_and_total() {
        let mut a = SignalCounts::default();
        assert!(a.is_empty());
        a.record(Signal::Download);
        a.record(Signal::MediaPlay);
        let mut b = SignalCounts::default();
        b.record(Signal::Download);
        a.merge(&b);
        assert_eq!(a.get(Signal::Download), 2);
        assert_eq!(a.total(), 3);
    }
}
