use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::odds;

/// Bet lifecycle: `pending` until settled, every other state is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Void,
    Cashout,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Void => "void",
            Self::Cashout => "cashout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for BetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "void" => Ok(Self::Void),
            "cashout" => Ok(Self::Cashout),
            _ => Err(format!("Invalid bet status: {}", s)),
        }
    }
}

impl TryFrom<String> for BetStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single bet on one selection of an event, odds fixed at placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Event id owned by the event/odds module
    pub event_id: i64,
    pub selection: String,
    pub coefficient: Decimal,
    pub stake: Decimal,
    pub potential_payout: Decimal,
    #[sqlx(try_from = "String")]
    pub status: BetStatus,
    pub actual_win: Option<Decimal>,
    /// Ledger entry that debited the stake
    pub stake_entry_id: Option<Uuid>,
    /// Ledger entry written on settlement
    pub settlement_entry_id: Option<Uuid>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Create a new pending bet
    pub fn new(
        user_id: Uuid,
        event_id: i64,
        selection: impl Into<String>,
        coefficient: Decimal,
        stake: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            selection: selection.into(),
            coefficient,
            stake,
            potential_payout: odds::potential_payout(stake, coefficient),
            status: BetStatus::Pending,
            actual_win: None,
            stake_entry_id: None,
            settlement_entry_id: None,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn profit(&self) -> Decimal {
        self.potential_payout - self.stake
    }

    /// Validate stake and odds before placement
    pub fn validate(&self) -> Result<(), String> {
        if self.stake <= Decimal::ZERO {
            return Err("Stake must be greater than zero".to_string());
        }
        if !super::ledger::is_whole_cents(self.stake) {
            return Err(format!(
                "Stake must have at most {} decimal places",
                super::ledger::MONEY_SCALE
            ));
        }
        if self.coefficient <= Decimal::ONE {
            return Err("Coefficient must be greater than 1".to_string());
        }
        if self.selection.trim().is_empty() {
            return Err("Selection must not be empty".to_string());
        }
        Ok(())
    }
}

/// How a pending bet is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "amount")]
pub enum BetResolution {
    Won,
    Lost,
    Void,
    /// Early settlement for the given amount
    Cashout(Decimal),
}

impl BetResolution {
    pub fn status(&self) -> BetStatus {
        match self {
            Self::Won => BetStatus::Won,
            Self::Lost => BetStatus::Lost,
            Self::Void => BetStatus::Void,
            Self::Cashout(_) => BetStatus::Cashout,
        }
    }
}

/// Filters for bet history
#[derive(Debug, Clone, Default)]
pub struct BetFilter {
    pub status: Option<BetStatus>,
    pub event_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl BetFilter {
    pub fn matches(&self, bet: &Bet) -> bool {
        self.status.map_or(true, |s| bet.status == s)
            && self.event_id.map_or(true, |e| bet.event_id == e)
            && self.from.map_or(true, |from| bet.placed_at >= from)
            && self.to.map_or(true, |to| bet.placed_at < to)
    }
}
