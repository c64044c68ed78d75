//! Ledger entry model: the append-only record of every balance-affecting event

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Decimal places a monetary amount may carry
pub const MONEY_SCALE: u32 = 2;

/// True when `amount` has no precision below a cent
pub fn is_whole_cents(amount: Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    BetPlaced,
    BetWon,
    BetLost,
    BetRefund,
    CouponWon,
    CouponLost,
    Fee,
    Adjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::BetPlaced => "bet_placed",
            Self::BetWon => "bet_won",
            Self::BetLost => "bet_lost",
            Self::BetRefund => "bet_refund",
            Self::CouponWon => "coupon_won",
            Self::CouponLost => "coupon_lost",
            Self::Fee => "fee",
            Self::Adjustment => "adjustment",
        }
    }

    /// Entries that count as a win in the account statistics
    pub fn is_win(&self) -> bool {
        matches!(self, Self::BetWon | Self::CouponWon)
    }

    /// Entries that count as a loss in the account statistics
    pub fn is_loss(&self) -> bool {
        matches!(self, Self::BetLost | Self::CouponLost)
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "bet_placed" => Ok(Self::BetPlaced),
            "bet_won" => Ok(Self::BetWon),
            "bet_lost" => Ok(Self::BetLost),
            "bet_refund" => Ok(Self::BetRefund),
            "coupon_won" => Ok(Self::CouponWon),
            "coupon_lost" => Ok(Self::CouponLost),
            "fee" => Ok(Self::Fee),
            "adjustment" => Ok(Self::Adjustment),
            _ => Err(format!("Invalid entry kind: {}", s)),
        }
    }
}

impl TryFrom<String> for EntryKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status recorded on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether an entry in this status moves the balance
    pub fn moves_balance(&self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid entry status: {}", s)),
        }
    }
}

impl TryFrom<String> for EntryStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Monotonic position within the whole ledger; replay order
    pub sequence: i64,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: EntryKind,
    /// Signed amount: credits positive, debits negative
    pub amount: Decimal,
    /// Change applied to the account's locked-in-bets amount
    pub locked_delta: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    pub external_reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The part of `amount` that actually moved the balance
    pub fn effective_amount(&self) -> Decimal {
        effective_amount(self.status, self.amount)
    }

    /// `balance_after == balance_before + effective_amount`
    pub fn is_consistent(&self) -> bool {
        self.balance_after - self.balance_before == self.effective_amount()
    }
}

/// Failed and cancelled entries are audit records with no balance effect
pub fn effective_amount(status: EntryStatus, amount: Decimal) -> Decimal {
    if status.moves_balance() {
        amount
    } else {
        Decimal::ZERO
    }
}

/// An entry waiting to be appended.
///
/// `expected_balance` is the balance the caller based its decision on; the store
/// refuses the append when the account has moved since.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub locked_delta: Decimal,
    pub status: EntryStatus,
    pub expected_balance: Decimal,
    pub external_reference: Option<String>,
    pub description: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(
        user_id: Uuid,
        kind: EntryKind,
        amount: Decimal,
        status: EntryStatus,
        expected_balance: Decimal,
    ) -> Self {
        Self {
            user_id,
            kind,
            amount,
            locked_delta: Decimal::ZERO,
            status,
            expected_balance,
            external_reference: None,
            description: None,
        }
    }

    /// Move `amount` into locked-in-bets
    pub fn locking(mut self, amount: Decimal) -> Self {
        self.locked_delta += amount;
        self
    }

    /// Release `amount` from locked-in-bets
    pub fn releasing(mut self, amount: Decimal) -> Self {
        self.locked_delta -= amount;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn effective_amount(&self) -> Decimal {
        effective_amount(self.status, self.amount)
    }
}

/// Filters for reading the ledger; every field is optional
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    pub status: Option<EntryStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.kind.map_or(true, |k| entry.kind == k)
            && self.status.map_or(true, |s| entry.status == s)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at < to)
    }
}
