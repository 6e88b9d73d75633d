//! # In-Memory Adapters
//!
//! [`MemoryRecords`] serves subscriptions and engagement events from a
//! [`RecordSet`] fixture. [`MemoryLedger`] implements [`SettlementStore`]
//! over a single `parking_lot::RwLock`, which gives every port operation
//! the atomicity the contract requires: a write lock is taken once,
//! validation runs on copies, and state is replaced only when everything
//! succeeded.
//!
//! The ledger state is a plain serde value, so the CLI can persist it to a
//! JSON file between invocations when no database is configured.
//!
//! The lock is never held across an `.await`.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use edu_core::{Month, SettlementId, Timestamp, UserId};
use edu_state::{
    apply_fifo, EducatorEarning, SettlementRecord, SettlementStatus, WithdrawalReceipt,
};

use crate::error::StoreError;
use crate::points::tally_events;
use crate::ports::{
    EngagementQuery, EngagementReader, EngagementTally, SettlementStore, SubscriptionReader,
};
use crate::records::{EngagementEvent, Subscription};

// ─── Source Records ──────────────────────────────────────────────────

/// Subscriptions and engagement events, as loaded from a fixture file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Subscription records.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Engagement events.
    #[serde(default)]
    pub events: Vec<EngagementEvent>,
}

impl RecordSet {
    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("reading {}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&text)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
        } else {
            serde_yaml::from_str(&text)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
        }
    }
}

/// Read ports over an in-memory [`RecordSet`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    data: Arc<RwLock<RecordSet>>,
}

impl MemoryRecords {
    /// Serve the given records.
    pub fn new(records: RecordSet) -> Self {
        Self {
            data: Arc::new(RwLock::new(records)),
        }
    }

    /// Add a subscription.
    pub fn push_subscription(&self, sub: Subscription) {
        self.data.write().subscriptions.push(sub);
    }
}

#[async_trait]
impl SubscriptionReader for MemoryRecords {
    async fn subscriptions_overlapping(
        &self,
        month: Month,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .data
            .read()
            .subscriptions
            .iter()
            .filter(|s| s.overlaps(month))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EngagementReader for MemoryRecords {
    async fn engagement_tallies(
        &self,
        query: &EngagementQuery,
    ) -> Result<Vec<EngagementTally>, StoreError> {
        Ok(tally_events(&self.data.read().events, query))
    }
}

// ─── Ledger ──────────────────────────────────────────────────────────

/// Serializable ledger contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Settlement rows, one per month.
    #[serde(default)]
    pub settlements: Vec<SettlementRecord>,
    /// Earnings rows of finalized settlements.
    #[serde(default)]
    pub earnings: Vec<EducatorEarning>,
    /// Processed withdrawals.
    #[serde(default)]
    pub withdrawals: Vec<WithdrawalReceipt>,
}

/// [`SettlementStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerSnapshot>,
    writes: AtomicU64,
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded from a snapshot.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            writes: AtomicU64::new(0),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.read().clone()
    }

    /// Number of mutating operations applied since construction.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Load from a JSON snapshot file. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("reading {}: {e}", path.display())))?;
        let snapshot: LedgerSnapshot = serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        for row in &snapshot.earnings {
            row.check_invariant()?;
        }
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the snapshot to `path`, creating parent directories.
    ///
    /// The JSON goes to a temporary file in the same directory which is
    /// then renamed over `path`, so a reader sees the old snapshot or the
    /// new one and never a partial write.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io = |e: std::io::Error| StoreError::Unavailable(format!("writing {}: {e}", path.display()));
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io)?;
        let json = serde_json::to_vec_pretty(&*self.state.read())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
        tmp.write_all(&json).map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(path).map_err(|e| io(e.error))?;
        Ok(())
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementStore for MemoryLedger {
    async fn find_settlement(&self, month: Month) -> Result<Option<SettlementRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .settlements
            .iter()
            .find(|s| s.month == month)
            .cloned())
    }

    async fn open_settlement(
        &self,
        record: SettlementRecord,
    ) -> Result<SettlementRecord, StoreError> {
        let mut state = self.state.write();
        let existing = state.settlements.iter().position(|s| s.month == record.month);
        let opened = match existing {
            Some(idx) if state.settlements[idx].is_finalized() => {
                return Err(StoreError::AlreadyFinalized {
                    month: record.month,
                })
            }
            Some(idx) => {
                state.settlements[idx].figures = record.figures;
                state.settlements[idx].clone()
            }
            None => {
                let mut fresh = record;
                fresh.status = SettlementStatus::Calculating;
                fresh.finalized_at = None;
                fresh.digest = None;
                fresh.educator_count = 0;
                state.settlements.push(fresh.clone());
                state.settlements.sort_by_key(|s| s.month);
                fresh
            }
        };
        self.bump();
        Ok(opened)
    }

    async fn finalize_settlement(
        &self,
        record: SettlementRecord,
        earnings: Vec<EducatorEarning>,
    ) -> Result<SettlementRecord, StoreError> {
        let month = record.month;
        let mut state = self.state.write();

        let idx = state
            .settlements
            .iter()
            .position(|s| s.month == month)
            .ok_or(StoreError::Contended { month })?;
        let mut current = state.settlements[idx].clone();
        current
            .try_transition(SettlementStatus::Finalized)
            .map_err(|_| StoreError::AlreadyFinalized { month })?;
        if current.id != record.id {
            return Err(StoreError::Contended { month });
        }

        let mut rows = state.earnings.clone();
        for incoming in earnings {
            match rows.iter_mut().find(|r| {
                r.educator == incoming.educator && r.settlement_id == incoming.settlement_id
            }) {
                Some(existing) => existing.restate(incoming.points, incoming.earnings)?,
                None => rows.push(incoming),
            }
        }

        let committed = SettlementRecord {
            status: current.status,
            ..record
        };
        state.earnings = rows;
        state.settlements[idx] = committed.clone();
        self.bump();
        Ok(committed)
    }

    async fn list_settlements(&self) -> Result<Vec<SettlementRecord>, StoreError> {
        let mut all = self.state.read().settlements.clone();
        all.sort_by_key(|s| s.month);
        Ok(all)
    }

    async fn earnings_for_educator(
        &self,
        educator: UserId,
    ) -> Result<Vec<EducatorEarning>, StoreError> {
        let state = self.state.read();
        let mut rows: Vec<EducatorEarning> = state
            .earnings
            .iter()
            .filter(|r| r.educator == educator)
            .filter(|r| {
                state
                    .settlements
                    .iter()
                    .any(|s| s.id == r.settlement_id && s.is_finalized())
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.month);
        Ok(rows)
    }

    async fn earnings_for_settlement(
        &self,
        settlement_id: SettlementId,
    ) -> Result<Vec<EducatorEarning>, StoreError> {
        let mut rows: Vec<EducatorEarning> = self
            .state
            .read()
            .earnings
            .iter()
            .filter(|r| r.settlement_id == settlement_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.educator);
        Ok(rows)
    }

    async fn withdraw_fifo(
        &self,
        educator: UserId,
        amount: Decimal,
        at: Timestamp,
    ) -> Result<WithdrawalReceipt, StoreError> {
        let mut state = self.state.write();
        // Only rows of finalized months are withdrawable; a loaded snapshot
        // may still carry rows under a CALCULATING settlement.
        let finalized: HashSet<SettlementId> = state
            .settlements
            .iter()
            .filter(|s| s.is_finalized())
            .map(|s| s.id)
            .collect();
        let mut rows: Vec<EducatorEarning> = state
            .earnings
            .iter()
            .filter(|r| r.educator == educator && finalized.contains(&r.settlement_id))
            .cloned()
            .collect();
        let receipt = apply_fifo(&mut rows, educator, amount, at)?;
        for row in rows {
            if let Some(slot) = state
                .earnings
                .iter_mut()
                .find(|r| r.educator == row.educator && r.settlement_id == row.settlement_id)
            {
                *slot = row;
            }
        }
        state.withdrawals.push(receipt.clone());
        self.bump();
        Ok(receipt)
    }

    async fn list_withdrawals(
        &self,
        educator: UserId,
    ) -> Result<Vec<WithdrawalReceipt>, StoreError> {
        Ok(self
            .state
            .read()
            .withdrawals
            .iter()
            .filter(|w| w.educator == educator)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edu_state::SettlementFigures;
    use rust_decimal_macros::dec;

    fn calculating(month: Month) -> SettlementRecord {
        SettlementRecord {
            id: SettlementId::new(),
            month,
            figures: SettlementFigures::default(),
            status: SettlementStatus::Calculating,
            finalized_at: None,
            digest: None,
            educator_count: 0,
        }
    }

    fn finalized(mut record: SettlementRecord, count: u64) -> SettlementRecord {
        record.status = SettlementStatus::Finalized;
        record.finalized_at = Some(Timestamp::now());
        record.digest = Some("00".repeat(32));
        record.educator_count = count;
        record
    }

    #[tokio::test]
    async fn open_reuses_calculating_row() {
        let ledger = MemoryLedger::new();
        let jan = Month::new(2026, 1).unwrap();
        let first = ledger.open_settlement(calculating(jan)).await.unwrap();
        let second = ledger.open_settlement(calculating(jan)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.list_settlements().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finalize_is_compare_and_swap() {
        let ledger = MemoryLedger::new();
        let jan = Month::new(2026, 1).unwrap();
        let opened = ledger.open_settlement(calculating(jan)).await.unwrap();
        let educator = UserId::new();
        let row = EducatorEarning::new(educator, opened.id, jan, dec!(10), dec!(100));

        ledger
            .finalize_settlement(finalized(opened.clone(), 1), vec![row.clone()])
            .await
            .unwrap();
        let again = ledger
            .finalize_settlement(finalized(opened.clone(), 1), vec![row])
            .await;
        assert!(matches!(again, Err(StoreError::AlreadyFinalized { .. })));
        assert!(matches!(
            ledger.open_settlement(calculating(jan)).await,
            Err(StoreError::AlreadyFinalized { .. })
        ));
        assert_eq!(ledger.earnings_for_educator(educator).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finalize_with_stale_id_rejected() {
        let ledger = MemoryLedger::new();
        let jan = Month::new(2026, 1).unwrap();
        ledger.open_settlement(calculating(jan)).await.unwrap();
        let stale = finalized(calculating(jan), 0);
        assert!(matches!(
            ledger.finalize_settlement(stale, vec![]).await,
            Err(StoreError::Contended { .. })
        ));
        assert!(!ledger.find_settlement(jan).await.unwrap().unwrap().is_finalized());
    }

    #[tokio::test]
    async fn restatement_keeps_withdrawn() {
        let jan = Month::new(2026, 1).unwrap();
        let educator = UserId::new();
        let settlement = calculating(jan);
        let mut paid = EducatorEarning::new(educator, settlement.id, jan, dec!(10), dec!(100));
        paid.debit(dec!(60)).unwrap();
        let ledger = MemoryLedger::from_snapshot(LedgerSnapshot {
            settlements: vec![settlement.clone()],
            earnings: vec![paid],
            withdrawals: vec![],
        });

        let shrink = EducatorEarning::new(educator, settlement.id, jan, dec!(5), dec!(50));
        let err = ledger
            .finalize_settlement(finalized(settlement.clone(), 1), vec![shrink])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Ledger(_)));
        assert!(!ledger.find_settlement(jan).await.unwrap().unwrap().is_finalized());

        let grow = EducatorEarning::new(educator, settlement.id, jan, dec!(12), dec!(120));
        ledger
            .finalize_settlement(finalized(settlement, 1), vec![grow])
            .await
            .unwrap();
        let rows = ledger.earnings_for_educator(educator).await.unwrap();
        assert_eq!(rows[0].withdrawn, dec!(60));
        assert_eq!(rows[0].available_balance, dec!(60));
    }

    #[tokio::test]
    async fn calculating_rows_not_reported_as_balance() {
        let jan = Month::new(2026, 1).unwrap();
        let educator = UserId::new();
        let settlement = calculating(jan);
        let ledger = MemoryLedger::from_snapshot(LedgerSnapshot {
            earnings: vec![EducatorEarning::new(
                educator,
                settlement.id,
                jan,
                dec!(1),
                dec!(10),
            )],
            settlements: vec![settlement],
            withdrawals: vec![],
        });
        assert!(ledger.earnings_for_educator(educator).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn calculating_rows_cannot_be_withdrawn() {
        let (jan, feb) = (Month::new(2026, 1).unwrap(), Month::new(2026, 2).unwrap());
        let educator = UserId::new();
        let settled = finalized(calculating(jan), 1);
        let pending = calculating(feb);
        let ledger = MemoryLedger::from_snapshot(LedgerSnapshot {
            earnings: vec![
                EducatorEarning::new(educator, settled.id, jan, dec!(1), dec!(10)),
                EducatorEarning::new(educator, pending.id, feb, dec!(1), dec!(50)),
            ],
            settlements: vec![settled.clone(), pending.clone()],
            withdrawals: vec![],
        });

        let err = ledger
            .withdraw_fifo(educator, dec!(20), Timestamp::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Ledger(_)));

        let receipt = ledger
            .withdraw_fifo(educator, dec!(10), Timestamp::now())
            .await
            .unwrap();
        assert_eq!(receipt.allocations.len(), 1);
        assert_eq!(receipt.allocations[0].settlement_id, settled.id);

        let rows = ledger.snapshot().earnings;
        let untouched = rows.iter().find(|r| r.settlement_id == pending.id).unwrap();
        assert_eq!(untouched.withdrawn, Decimal::ZERO);
        assert_eq!(untouched.available_balance, dec!(50));
    }

    #[tokio::test]
    async fn snapshot_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        let empty = MemoryLedger::load(&path).unwrap();
        assert_eq!(empty.snapshot(), LedgerSnapshot::default());

        let jan = Month::new(2026, 1).unwrap();
        empty.open_settlement(calculating(jan)).await.unwrap();
        empty.save(&path).unwrap();

        let reloaded = MemoryLedger::load(&path).unwrap();
        assert_eq!(reloaded.snapshot(), empty.snapshot());
        assert_eq!(reloaded.write_count(), 0);
    }

    #[tokio::test]
    async fn save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "stale").unwrap();

        let ledger = MemoryLedger::new();
        ledger
            .open_settlement(calculating(Month::new(2026, 1).unwrap()))
            .await
            .unwrap();
        ledger.save(&path).unwrap();
        ledger.save(&path).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("ledger.json")]);
        assert_eq!(MemoryLedger::load(&path).unwrap().snapshot(), ledger.snapshot());
    }

    #[tokio::test]
    async fn corrupt_snapshot_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(MemoryLedger::load(&path), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn record_set_loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.yaml");
        std::fs::write(
            &path,
            r#"
subscriptions:
  - id: "00000000-0000-0000-0000-000000000001"
    user_id: "00000000-0000-0000-0000-0000000000aa"
    start_date: 2026-01-01
    expiry_date: 2026-02-01
    plan_price: "1000"
    status: active
events:
  - actor_id: "00000000-0000-0000-0000-0000000000aa"
    owner_id: "00000000-0000-0000-0000-0000000000bb"
    timestamp: 2026-01-05T10:00:00Z
    kind:
      type: media_play
      watch_ratio: 0.8
"#,
        )
        .unwrap();
        let set = RecordSet::load(&path).unwrap();
        assert_eq!(set.subscriptions.len(), 1);
        assert_eq!(set.subscriptions[0].plan_price, Some(dec!(1000)));
        assert!(!set.subscriptions[0].is_yearly);
        assert_eq!(set.events.len(), 1);
    }
}
