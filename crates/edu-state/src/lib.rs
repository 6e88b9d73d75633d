//! # edu-state — Settlement Lifecycle and Earnings Ledger
//!
//! ## State Machines
//!
//! - **Settlement** (`settlement.rs`): `Calculating → Finalized`, encoded
//!   as `Settlement<Calculating>` / `Settlement<Finalized>`. Earnings can
//!   only be allocated while calculating; a digest and `finalized_at` only
//!   exist once finalized. `SettlementRecord` is the runtime form used for
//!   persistence.
//!
//! - **Earning row** (`earning.rs`): one educator's share of one settlement.
//!   `withdrawn` only grows; `available_balance = earnings − withdrawn`
//!   holds after every operation.
//!
//! - **Withdrawal** (`withdrawal.rs`): FIFO allocation of a withdrawal across
//!   an educator's finalized rows, planned in full before any row is debited.

pub mod earning;
pub mod settlement;
pub mod withdrawal;

pub use earning::{EarningError, EducatorEarning};
pub use settlement::{
    settlement_digest, trim_rounding_excess, Calculating, EarningAllocation, Finalized,
    Settlement, SettlementError, SettlementFigures, SettlementRecord, SettlementState,
    SettlementStatus,
};
pub use withdrawal::{apply_fifo, plan_fifo, Allocation, WithdrawalReceipt};
