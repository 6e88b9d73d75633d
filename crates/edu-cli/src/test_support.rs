//! Record fixtures for the subcommand tests.

use std::path::Path;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;

use edu_core::{SubscriptionId, UserId};
use edu_settlement::{EngagementEvent, EngagementKind, RecordSet, Subscription, SubscriptionStatus};

/// January 2026: two full-month subscriptions (1000 + 1500) and two
/// educators with 8 and 12 live attendances.
///
/// At the default 0.7 share and weight 5 that is 2500.00 gross, 1750.00
/// distributable, 100 points at 17.50, so 700.00 and 1050.00.
pub fn fixture() -> (RecordSet, UserId, UserId) {
    let (a, b) = (UserId::new(), UserId::new());
    let subscription = |price| Subscription {
        id: SubscriptionId::new(),
        user_id: UserId::new(),
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        expiry_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        plan_price: Some(price),
        status: SubscriptionStatus::Active,
        is_yearly: false,
    };
    let attend = |owner: UserId, day: u32| EngagementEvent {
        actor_id: UserId::new(),
        owner_id: owner,
        timestamp: Utc.with_ymd_and_hms(2026, 1, day, 18, 0, 0).unwrap(),
        kind: EngagementKind::LiveAttendance,
    };

    let mut events: Vec<EngagementEvent> = (1..=8).map(|d| attend(a, d)).collect();
    events.extend((1..=12).map(|d| attend(b, d)));
    // Self-attendance earns nothing.
    events.push(EngagementEvent {
        actor_id: a,
        ..attend(a, 20)
    });

    let records = RecordSet {
        subscriptions: vec![subscription(dec!(1000.00)), subscription(dec!(1500.00))],
        events,
    };
    (records, a, b)
}

/// Write `records` as JSON.
pub fn write_records(path: &Path, records: &RecordSet) {
    std::fs::write(path, serde_json::to_string_pretty(records).unwrap()).unwrap();
}
