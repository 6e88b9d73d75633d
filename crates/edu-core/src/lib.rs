#![deny(missing_docs)]

//! # edu-core — Foundational Types for the Settlement Engine
//!
//! This crate is the leaf of the workspace DAG. It defines the primitives
//! every other crate builds on and depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `UserId`, `SettlementId`,
//!    `SubscriptionId`, `WithdrawalId` are distinct types. An educator id
//!    cannot be passed where a settlement id is expected.
//!
//! 2. **`Month` is the settlement key.** A calendar month is always stored
//!    as its first day. Day counts, window bounds and parsing live on the
//!    type so no caller re-derives them.
//!
//! 3. **Money is fixed-point.** All currency and point amounts are
//!    `rust_decimal::Decimal`. Floats never carry money. Rounding to the
//!    cent goes through [`money::round_money`] only.
//!
//! 4. **Digests flow through `CanonicalBytes`.** Settlement fingerprints are
//!    SHA-256 over JCS-canonical JSON, so two runs over the same figures
//!    produce the same digest.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `edu-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod config;
pub mod digest;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use config::{
    GracePeriodPolicy, PlanPricing, PointWeights, PointsConfig, RevenueConfig, SettlementConfig,
};
pub use digest::{sha256_digest, ContentDigest};
pub use error::{CanonicalizationError, ConfigError, CoreError};
pub use identity::{SettlementId, SubscriptionId, UserId, WithdrawalId};
pub use money::{parse_amount, round_money, round_points};
pub use temporal::{Month, Timestamp};
