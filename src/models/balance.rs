//! Balance aggregate and the read-time snapshot built from it

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::ledger::{effective_amount, EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry};
use crate::error::RepositoryError;

/// Current state of an account's funds, projected from the ledger
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub locked_in_bets: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub total_bet: Decimal,
    pub total_won: Decimal,
    pub total_lost: Decimal,
    pub wins_count: i64,
    pub losses_count: i64,
    /// Bumped on every write; guards the read-modify-write cycle
    pub version: i64,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserBalance {
    /// Zero-balance record for an account with no activity
    pub fn zero(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            locked_in_bets: Decimal::ZERO,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            total_bet: Decimal::ZERO,
            total_won: Decimal::ZERO,
            total_lost: Decimal::ZERO,
            wins_count: 0,
            losses_count: 0,
            version: 0,
            last_transaction_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply one entry's delta, refusing to go below zero
    pub fn apply(&self, delta: &BalanceDelta, at: DateTime<Utc>) -> Result<Self, RepositoryError> {
        let balance = self.balance + delta.balance;
        if balance < Decimal::ZERO {
            return Err(RepositoryError::NegativeBalance {
                available: self.balance,
                required: -delta.balance,
            });
        }
        let locked_in_bets = self.locked_in_bets + delta.locked;
        if locked_in_bets < Decimal::ZERO {
            return Err(RepositoryError::NegativeBalance {
                available: self.locked_in_bets,
                required: -delta.locked,
            });
        }

        Ok(Self {
            user_id: self.user_id,
            balance,
            locked_in_bets,
            total_deposited: self.total_deposited + delta.deposited,
            total_withdrawn: self.total_withdrawn + delta.withdrawn,
            total_bet: self.total_bet + delta.wagered,
            total_won: self.total_won + delta.won,
            total_lost: self.total_lost + delta.lost,
            wins_count: self.wins_count + delta.wins,
            losses_count: self.losses_count + delta.losses,
            version: self.version + 1,
            last_transaction_at: Some(at),
            updated_at: at,
        })
    }

    /// Rebuild the aggregate by replaying entries in ledger order
    pub fn replay<'a>(
        user_id: Uuid,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Result<Self, RepositoryError> {
        entries.into_iter().try_fold(Self::zero(user_id), |acc, entry| {
            acc.apply(&BalanceDelta::from_entry(entry), entry.created_at)
        })
    }

    /// Fields that must agree between the stored aggregate and a ledger replay
    pub fn diff(&self, other: &Self) -> Vec<String> {
        let mut mismatches = Vec::new();
        let pairs = [
            ("balance", self.balance, other.balance),
            ("locked_in_bets", self.locked_in_bets, other.locked_in_bets),
            ("total_deposited", self.total_deposited, other.total_deposited),
            ("total_withdrawn", self.total_withdrawn, other.total_withdrawn),
            ("total_bet", self.total_bet, other.total_bet),
            ("total_won", self.total_won, other.total_won),
            ("total_lost", self.total_lost, other.total_lost),
        ];
        for (field, ours, theirs) in pairs {
            if ours != theirs {
                mismatches.push(format!("{}: stored {} replayed {}", field, ours, theirs));
            }
        }
        if self.wins_count != other.wins_count {
            mismatches.push(format!(
                "wins_count: stored {} replayed {}",
                self.wins_count, other.wins_count
            ));
        }
        if self.losses_count != other.losses_count {
            mismatches.push(format!(
                "losses_count: stored {} replayed {}",
                self.losses_count, other.losses_count
            ));
        }
        mismatches
    }
}

/// Change one ledger entry makes to the aggregate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceDelta {
    pub balance: Decimal,
    pub locked: Decimal,
    pub deposited: Decimal,
    pub withdrawn: Decimal,
    pub wagered: Decimal,
    pub won: Decimal,
    pub lost: Decimal,
    pub wins: i64,
    pub losses: i64,
}

impl BalanceDelta {
    /// Derive the aggregate change from an entry's kind, status and amounts.
    ///
    /// Entries that do not move the balance (failed, cancelled) change nothing at all.
    pub fn compute(
        kind: EntryKind,
        status: EntryStatus,
        amount: Decimal,
        locked_delta: Decimal,
    ) -> Self {
        if !status.moves_balance() {
            return Self::default();
        }
        let eff = effective_amount(status, amount);
        let mut delta = Self {
            balance: eff,
            locked: locked_delta,
            ..Self::default()
        };

        match kind {
            EntryKind::Deposit => delta.deposited = eff,
            EntryKind::Withdrawal => delta.withdrawn = -eff,
            EntryKind::BetPlaced | EntryKind::BetRefund => delta.wagered = -eff,
            EntryKind::BetWon | EntryKind::CouponWon => delta.won = eff,
            EntryKind::BetLost | EntryKind::CouponLost => delta.lost = -locked_delta,
            EntryKind::Fee | EntryKind::Adjustment => {}
        }

        if status == EntryStatus::Completed {
            if kind.is_win() {
                delta.wins = 1;
            } else if kind.is_loss() {
                delta.losses = 1;
            }
        }

        delta
    }

    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self::compute(entry.kind, entry.status, entry.amount, entry.locked_delta)
    }

    pub fn from_new_entry(entry: &NewLedgerEntry) -> Self {
        Self::compute(entry.kind, entry.status, entry.amount, entry.locked_delta)
    }
}

/// Balance with every derived metric, computed at read time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub user_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub locked_in_bets: Decimal,
    /// Funds that can be withdrawn or staked; open stakes already left `balance`
    pub available_balance: Decimal,
    pub exposure: Decimal,
    pub total_equity: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub total_bet: Decimal,
    pub total_won: Decimal,
    pub total_lost: Decimal,
    pub wins_count: i64,
    pub losses_count: i64,
    pub net_profit: Decimal,
    pub roi_percent: Decimal,
    pub win_rate: Decimal,
    pub pending_deposits: Decimal,
    pub pending_withdrawals: Decimal,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

impl BalanceSnapshot {
    pub fn new(
        balance: &UserBalance,
        currency: impl Into<String>,
        pending_deposits: Decimal,
        pending_withdrawals: Decimal,
    ) -> Self {
        Self {
            user_id: balance.user_id,
            currency: currency.into(),
            balance: balance.balance,
            locked_in_bets: balance.locked_in_bets,
            available_balance: balance.balance,
            exposure: balance.locked_in_bets,
            total_equity: balance.balance + balance.locked_in_bets,
            total_deposited: balance.total_deposited,
            total_withdrawn: balance.total_withdrawn,
            total_bet: balance.total_bet,
            total_won: balance.total_won,
            total_lost: balance.total_lost,
            wins_count: balance.wins_count,
            losses_count: balance.losses_count,
            net_profit: net_profit(balance.total_won, balance.total_lost),
            roi_percent: roi_percent(balance.total_won, balance.total_bet),
            win_rate: win_rate(balance.wins_count, balance.losses_count),
            pending_deposits,
            pending_withdrawals,
            last_transaction_at: balance.last_transaction_at,
        }
    }
}

pub fn net_profit(total_won: Decimal, total_lost: Decimal) -> Decimal {
    total_won - total_lost
}

/// `total_won / total_bet * 100`, zero when nothing was wagered
pub fn roi_percent(total_won: Decimal, total_bet: Decimal) -> Decimal {
    if total_bet > Decimal::ZERO {
        (total_won / total_bet * Decimal::ONE_HUNDRED).round_dp(2)
    } else {
        Decimal::ZERO
    }
}

/// `wins / (wins + losses) * 100`, zero with no settled bets
pub fn win_rate(wins: i64, losses: i64) -> Decimal {
    let settled = wins + losses;
    if settled > 0 {
        (Decimal::from(wins) / Decimal::from(settled) * Decimal::ONE_HUNDRED).round_dp(2)
    } else {
        Decimal::ZERO
    }
}

/// Result of replaying an account's ledger against its stored aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub user_id: Uuid,
    pub entries_replayed: usize,
    pub stored: UserBalance,
    pub replayed: UserBalance,
    /// Entries whose before/after pair does not match the running balance
    pub broken_entries: Vec<Uuid>,
    pub mismatches: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.broken_entries.is_empty()
    }
}
