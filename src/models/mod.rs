//! Domain models for the LooseLINE wallet core.
//!
//! Database-backed records for accounts, the ledger, the balance aggregate,
//! operations awaiting external confirmation, bets and coupons.

pub mod account;
pub mod balance;
pub mod bet;
pub mod coupon;
pub mod ledger;
pub mod pending;

use serde::{Deserialize, Serialize};

pub use account::{Account, WithdrawalMethod};
pub use balance::{BalanceDelta, BalanceSnapshot, ReconciliationReport, UserBalance};
pub use bet::{Bet, BetFilter, BetResolution, BetStatus};
pub use coupon::{generate_code, Coupon, CouponReceipt, CouponStatus, CouponWithLegs};
pub use ledger::{
    is_whole_cents, EntryFilter, EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry, MONEY_SCALE,
};
pub use pending::{OperationKind, OperationStatus, PendingOperation};

/// Limit/offset window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    pub const MAX_LIMIT: i64 = 500;

    /// Clamp to sane bounds
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(50, 0)
    }
}

/// One page of results plus the total matching count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total
    }
}
