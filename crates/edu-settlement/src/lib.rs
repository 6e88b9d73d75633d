//! # edu-settlement — Monthly Revenue & Engagement-Points Settlement
//!
//! Turns subscription billing records and learner engagement events into
//! one immutable settlement per calendar month, and maintains each
//! educator's withdrawable balance.
//!
//! ## Components
//!
//! - [`RevenueCalculator`]: day-level proration of subscription prices into
//!   a month, and the educator share of that revenue.
//! - [`PointsCalculator`]: weighted engagement points per educator and
//!   platform-wide, self-activity excluded.
//! - [`SettlementEngine`]: composes both into an idempotent
//!   `CALCULATING → FINALIZED` run, and serves balances and FIFO
//!   withdrawals over the earnings ledger.
//!
//! ## Ports
//!
//! Storage is reached only through the traits in [`ports`]. The
//! [`memory`] module implements them in process; `edu-store` implements
//! them over PostgreSQL.
//!
//! ## Crate Policy
//!
//! - Amounts are `Decimal` end to end.
//! - No `.unwrap()` outside tests.
//! - Locks are never held across `.await`.

pub mod engine;
pub mod error;
pub mod memory;
pub mod points;
pub mod ports;
pub mod records;
pub mod revenue;

pub use engine::{
    EarningDrift, EducatorBalance, MonthlyBalance, SettlementEngine, SettlementPreview,
    SettlementSummary, VerificationReport,
};
pub use error::{Phase, SettlementError, StoreError};
pub use memory::{LedgerSnapshot, MemoryLedger, MemoryRecords, RecordSet};
pub use points::{tally_events, PointsCalculator, PointsSummary, SignalPoints};
pub use ports::{
    EngagementQuery, EngagementReader, EngagementTally, SettlementStore, SubscriptionReader,
};
pub use records::{
    EngagementEvent, EngagementKind, Signal, SignalCounts, Subscription, SubscriptionStatus,
};
pub use revenue::{prorate, MonthlyRevenue, RevenueCalculator, SubscriptionContribution};
