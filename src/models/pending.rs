//! Deposits and withdrawals waiting on external confirmation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            _ => Err(format!("Invalid operation kind: {}", s)),
        }
    }
}

impl TryFrom<String> for OperationKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid operation status: {}", s)),
        }
    }
}

impl TryFrom<String> for OperationStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable tracking record for an operation in flight.
///
/// The ledger stays append-only; this row is what callbacks flip, exactly once,
/// from `pending` to a resolved status.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: OperationKind,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: OperationStatus,
    /// Gateway intent id for deposits, generated payout reference for withdrawals
    pub external_reference: String,
    pub withdrawal_method_id: Option<Uuid>,
    /// Entry written for this operation: at request time for withdrawals, at finalization for deposits
    pub ledger_entry_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    pub fn deposit(
        user_id: Uuid,
        amount: Decimal,
        external_reference: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind: OperationKind::Deposit,
            amount,
            status: OperationStatus::Pending,
            external_reference: external_reference.into(),
            withdrawal_method_id: None,
            ledger_entry_id: None,
            expires_at: Some(expires_at),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// The store links `ledger_entry_id` when it appends the debit
    pub fn withdrawal(user_id: Uuid, amount: Decimal, method_id: Uuid) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            user_id,
            kind: OperationKind::Withdrawal,
            amount,
            status: OperationStatus::Pending,
            external_reference: format!("WD-{}", id.simple()),
            withdrawal_method_id: Some(method_id),
            ledger_entry_id: None,
            expires_at: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending && self.expires_at.map_or(false, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_deposit_expiry() {
        let now = Utc::now();
        let op = PendingOperation::deposit(Uuid::new_v4(), Decimal::ONE, "pi_1", now + Duration::hours(24));
        assert!(!op.is_expired(now));
        assert!(op.is_expired(now + Duration::hours(25)));
    }

    #[test]
    fn test_withdrawal_has_no_expiry() {
        let op = PendingOperation::withdrawal(Uuid::new_v4(), Decimal::TEN, Uuid::new_v4());
        assert!(op.external_reference.starts_with("WD-"));
        assert!(!op.is_expired(Utc::now() + Duration::days(365)));
    }
}
