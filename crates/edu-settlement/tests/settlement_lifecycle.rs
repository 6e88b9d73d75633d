//! Settlement lifecycle against the in-memory adapters: interrupted runs,
//! concurrent runs, FIFO withdrawals and drift verification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use edu_core::{Month, SettlementConfig, SettlementId, SubscriptionId, Timestamp, UserId};
use edu_settlement::{
    EngagementEvent, EngagementKind, EngagementQuery, EngagementReader, EngagementTally,
    MemoryLedger, MemoryRecords, RecordSet, SettlementEngine, SettlementError, SettlementStore,
    StoreError, Subscription, SubscriptionReader, SubscriptionStatus,
};
use edu_state::{EducatorEarning, SettlementRecord, SettlementStatus, WithdrawalReceipt};

fn month(m: u32) -> Month {
    Month::new(2026, m).unwrap()
}

fn subscription(price: Decimal, from: Month, to: Month) -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        user_id: UserId::new(),
        start_date: from.first_day(),
        expiry_date: to.last_day(),
        plan_price: Some(price),
        status: SubscriptionStatus::Active,
        is_yearly: false,
    }
}

fn attendances(owner: UserId, m: Month, n: u32) -> Vec<EngagementEvent> {
    (0..n)
        .map(|i| EngagementEvent {
            actor_id: UserId::new(),
            owner_id: owner,
            timestamp: Utc
                .with_ymd_and_hms(m.year(), m.month(), 1 + i % 28, 12, 0, 0)
                .unwrap(),
            kind: EngagementKind::LiveAttendance,
        })
        .collect()
}

/// Ledger wrapper whose finalize fails once when armed.
struct FlakyLedger {
    inner: MemoryLedger,
    fail_finalize: AtomicBool,
}

#[async_trait]
impl SettlementStore for FlakyLedger {
    async fn find_settlement(&self, month: Month) -> Result<Option<SettlementRecord>, StoreError> {
        self.inner.find_settlement(month).await
    }

    async fn open_settlement(
        &self,
        record: SettlementRecord,
    ) -> Result<SettlementRecord, StoreError> {
        self.inner.open_settlement(record).await
    }

    async fn finalize_settlement(
        &self,
        record: SettlementRecord,
        earnings: Vec<EducatorEarning>,
    ) -> Result<SettlementRecord, StoreError> {
        if self.fail_finalize.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.finalize_settlement(record, earnings).await
    }

    async fn list_settlements(&self) -> Result<Vec<SettlementRecord>, StoreError> {
        self.inner.list_settlements().await
    }

    async fn earnings_for_educator(
        &self,
        educator: UserId,
    ) -> Result<Vec<EducatorEarning>, StoreError> {
        self.inner.earnings_for_educator(educator).await
    }

    async fn earnings_for_settlement(
        &self,
        settlement_id: SettlementId,
    ) -> Result<Vec<EducatorEarning>, StoreError> {
        self.inner.earnings_for_settlement(settlement_id).await
    }

    async fn withdraw_fifo(
        &self,
        educator: UserId,
        amount: Decimal,
        at: Timestamp,
    ) -> Result<WithdrawalReceipt, StoreError> {
        self.inner.withdraw_fifo(educator, amount, at).await
    }

    async fn list_withdrawals(
        &self,
        educator: UserId,
    ) -> Result<Vec<WithdrawalReceipt>, StoreError> {
        self.inner.list_withdrawals(educator).await
    }
}

/// Records source that yields once before answering, so two runs polled
/// together interleave.
struct YieldingRecords(MemoryRecords);

#[async_trait]
impl SubscriptionReader for YieldingRecords {
    async fn subscriptions_overlapping(
        &self,
        month: Month,
    ) -> Result<Vec<Subscription>, StoreError> {
        tokio::task::yield_now().await;
        self.0.subscriptions_overlapping(month).await
    }
}

#[async_trait]
impl EngagementReader for YieldingRecords {
    async fn engagement_tallies(
        &self,
        query: &EngagementQuery,
    ) -> Result<Vec<EngagementTally>, StoreError> {
        tokio::task::yield_now().await;
        self.0.engagement_tallies(query).await
    }
}

#[tokio::test]
async fn interrupted_commit_leaves_calculating_and_retry_finalizes() {
    let educator = UserId::new();
    let records = Arc::new(MemoryRecords::new(RecordSet {
        subscriptions: vec![subscription(dec!(1000), month(1), month(3))],
        events: attendances(educator, month(1), 4),
    }));
    let ledger = Arc::new(FlakyLedger {
        inner: MemoryLedger::new(),
        fail_finalize: AtomicBool::new(true),
    });
    let engine = SettlementEngine::new(
        records.clone(),
        records,
        ledger.clone(),
        SettlementConfig::default(),
    );

    let err = engine.run_settlement(month(1)).await.unwrap_err();
    assert!(matches!(err, SettlementError::TransientStore { .. }));
    assert!(err.is_retryable());

    let stuck = engine.get_settlement(month(1)).await.unwrap().unwrap();
    assert_eq!(stuck.status, SettlementStatus::Calculating);
    assert!(ledger.inner.snapshot().earnings.is_empty());

    let done = engine.run_settlement(month(1)).await.unwrap();
    assert_eq!(done.status, SettlementStatus::Finalized);
    assert_eq!(done.id, stuck.id);
    assert_eq!(
        engine
            .get_educator_balance_as_of(educator, month(2))
            .await
            .unwrap()
            .finalized_balance,
        dec!(700.00)
    );
}

#[tokio::test]
async fn concurrent_runs_in_one_process_commit_once() {
    let educator = UserId::new();
    let records = Arc::new(YieldingRecords(MemoryRecords::new(RecordSet {
        subscriptions: vec![subscription(dec!(1000), month(1), month(1))],
        events: attendances(educator, month(1), 2),
    })));
    let ledger = Arc::new(MemoryLedger::new());
    let engine = SettlementEngine::new(
        records.clone(),
        records,
        ledger.clone(),
        SettlementConfig::default(),
    );

    let (a, b) = tokio::join!(engine.run_settlement(month(1)), engine.run_settlement(month(1)));
    let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
    assert!(matches!(
        loser,
        Err(SettlementError::ConcurrencyConflict { .. })
    ));
    assert_eq!(ledger.snapshot().earnings.len(), 1);

    // Once the winning run is done, the month is simply cached.
    assert_eq!(engine.run_settlement(month(1)).await.unwrap(), winner.unwrap());
}

#[tokio::test]
async fn concurrent_runs_across_engines_commit_once() {
    let educator = UserId::new();
    let records = Arc::new(YieldingRecords(MemoryRecords::new(RecordSet {
        subscriptions: vec![subscription(dec!(1000), month(1), month(1))],
        events: attendances(educator, month(1), 2),
    })));
    let ledger = Arc::new(MemoryLedger::new());
    let make = || {
        SettlementEngine::new(
            records.clone(),
            records.clone(),
            ledger.clone(),
            SettlementConfig::default(),
        )
    };
    let (first, second) = (make(), make());

    let (a, b) = tokio::join!(first.run_settlement(month(1)), second.run_settlement(month(1)));
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser,
        Err(SettlementError::ConcurrencyConflict { .. })
    ));
    assert_eq!(ledger.snapshot().earnings.len(), 1);
    assert_eq!(ledger.list_settlements().await.unwrap().len(), 1);
}

#[tokio::test]
async fn fifo_withdrawal_across_months() {
    let educator = UserId::new();
    // January: 1000 * 0.7 = 700 distributable; educator holds 3/7 of points -> 300.
    // February: 1000 * 0.7 = 700; educator holds 5/7 -> 500.
    let other = UserId::new();
    let mut events = attendances(educator, month(1), 3);
    events.extend(attendances(other, month(1), 4));
    events.extend(attendances(educator, month(2), 5));
    events.extend(attendances(other, month(2), 2));
    let records = Arc::new(MemoryRecords::new(RecordSet {
        subscriptions: vec![subscription(dec!(1000), month(1), month(2))],
        events,
    }));
    let ledger = Arc::new(MemoryLedger::new());
    let engine = SettlementEngine::new(
        records.clone(),
        records,
        ledger.clone(),
        SettlementConfig::default(),
    );
    engine.run_settlement(month(1)).await.unwrap();
    engine.run_settlement(month(2)).await.unwrap();

    let balance = engine
        .get_educator_balance_as_of(educator, month(3))
        .await
        .unwrap();
    assert_eq!(balance.finalized_balance, dec!(800.00));
    assert_eq!(balance.current_month_estimate, Decimal::ZERO);

    let receipt = engine.process_withdrawal(educator, dec!(600)).await.unwrap();
    assert_eq!(receipt.allocations.len(), 2);
    assert_eq!(receipt.allocations[0].month, month(1));
    assert_eq!(receipt.allocations[0].amount, dec!(300.00));
    assert_eq!(receipt.allocations[1].amount, dec!(300.00));

    let balance = engine
        .get_educator_balance_as_of(educator, month(3))
        .await
        .unwrap();
    let by_month: Vec<(Month, Decimal)> = balance
        .monthly_breakdown
        .iter()
        .map(|b| (b.month, b.available_balance))
        .collect();
    assert_eq!(
        by_month,
        vec![(month(1), dec!(0.00)), (month(2), dec!(200.00))]
    );

    let before = ledger.snapshot();
    let err = engine
        .process_withdrawal(educator, dec!(200.01))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InsufficientBalance { requested, available, .. }
            if requested == dec!(200.01) && available == dec!(200.00)
    ));
    assert_eq!(ledger.snapshot(), before);

    let history = engine.list_withdrawals(educator).await.unwrap();
    assert_eq!(history, vec![receipt]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_withdrawals_cannot_overdraw() {
    let educator = UserId::new();
    let records = Arc::new(MemoryRecords::new(RecordSet {
        subscriptions: vec![subscription(dec!(1000), month(1), month(1))],
        events: attendances(educator, month(1), 2),
    }));
    let ledger = Arc::new(MemoryLedger::new());
    let engine = SettlementEngine::new(
        records.clone(),
        records,
        ledger.clone(),
        SettlementConfig::default(),
    );
    engine.run_settlement(month(1)).await.unwrap();

    // 500 + 400 against a 700 balance: only one of them fits.
    let (first, second) = tokio::join!(
        engine.process_withdrawal(educator, dec!(500)),
        engine.process_withdrawal(educator, dec!(400)),
    );
    let (accepted, rejected) = match (first, second) {
        (Ok(receipt), Err(err)) | (Err(err), Ok(receipt)) => (receipt, err),
        (first, second) => panic!("expected exactly one withdrawal, got {first:?} and {second:?}"),
    };
    assert!(matches!(rejected, SettlementError::InsufficientBalance { .. }));

    let rows = ledger.earnings_for_educator(educator).await.unwrap();
    let withdrawn: Decimal = rows.iter().map(|r| r.withdrawn).sum();
    assert_eq!(withdrawn, accepted.amount);
    assert_eq!(
        engine.list_withdrawals(educator).await.unwrap(),
        vec![accepted]
    );
}

#[tokio::test]
async fn verify_reports_drift_without_rewriting() {
    let educator = UserId::new();
    let records = Arc::new(MemoryRecords::new(RecordSet {
        subscriptions: vec![subscription(dec!(1000), month(1), month(1))],
        events: attendances(educator, month(1), 2),
    }));
    let ledger = Arc::new(MemoryLedger::new());
    let engine = SettlementEngine::new(
        records.clone(),
        records.clone(),
        ledger.clone(),
        SettlementConfig::default(),
    );
    let summary = engine.run_settlement(month(1)).await.unwrap();

    let clean = engine.verify_settlement(month(1)).await.unwrap();
    assert!(clean.matches());
    assert!(clean.drift.is_empty());

    // A late-arriving subscription changes January's revenue.
    records.push_subscription(Subscription {
        id: SubscriptionId::new(),
        user_id: UserId::new(),
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        expiry_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        plan_price: Some(dec!(1000)),
        status: SubscriptionStatus::Active,
        is_yearly: false,
    });
    let writes = ledger.write_count();
    let drifted = engine.verify_settlement(month(1)).await.unwrap();
    assert!(!drifted.matches());
    assert_eq!(drifted.recomputed.gross_revenue, dec!(2000.00));
    assert_eq!(drifted.drift.len(), 1);
    assert_eq!(drifted.drift[0].stored, dec!(700.00));
    assert_eq!(drifted.drift[0].recomputed, dec!(1400.00));
    assert_eq!(ledger.write_count(), writes);

    // The stored settlement is untouched.
    assert_eq!(engine.run_settlement(month(1)).await.unwrap(), summary);
}

#[tokio::test]
async fn data_integrity_aborts_before_any_write() {
    let mut broken = subscription(dec!(1000), month(1), month(1));
    broken.plan_price = None;
    let records = Arc::new(MemoryRecords::new(RecordSet {
        subscriptions: vec![broken],
        events: vec![],
    }));
    let ledger = Arc::new(MemoryLedger::new());
    let engine = SettlementEngine::new(
        records.clone(),
        records,
        ledger.clone(),
        SettlementConfig::default(),
    );
    assert!(matches!(
        engine.run_settlement(month(1)).await,
        Err(SettlementError::DataIntegrity { .. })
    ));
    assert_eq!(ledger.write_count(), 0);
    assert!(engine.list_settlements().await.unwrap().is_empty());
}
