//! Account and payout destination models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Wallet account, one per user, provisioned on first balance-affecting operation
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub user_id: Uuid,
    pub currency: String,
    /// Customer id at the payment gateway, set once on first deposit
    pub gateway_customer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: Uuid, currency: impl Into<String>) -> Self {
        Self {
            user_id,
            currency: currency.into(),
            gateway_customer_ref: None,
            created_at: Utc::now(),
        }
    }
}

/// Payout destination registered by a user
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WithdrawalMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    /// e.g. "bank_card", "bank_account", "e_wallet"
    pub method_type: String,
    pub details: Json<serde_json::Value>,
    pub is_verified: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalMethod {
    /// Create an unverified destination
    pub fn new(user_id: Uuid, method_type: impl Into<String>, details: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            method_type: method_type.into(),
            details: Json(details),
            is_verified: false,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn belongs_to(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}
