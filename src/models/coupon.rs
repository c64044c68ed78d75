//! Multi-leg coupon model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::odds::CouponQuote;

/// `CPN{YYYYMMDD}_{6 digits}`
pub fn generate_code(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().as_u128() % 1_000_000;
    format!("CPN{}_{:06}", at.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    Open,
    Won,
    Lost,
    Void,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Void => "void",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl FromStr for CouponStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "void" => Ok(Self::Void),
            _ => Err(format!("Invalid coupon status: {}", s)),
        }
    }
}

impl TryFrom<String> for CouponStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code: String,
    pub stake: Decimal,
    /// Product of the linked legs' coefficients, unrounded
    pub total_coefficient: Decimal,
    pub potential_payout: Decimal,
    #[sqlx(try_from = "String")]
    pub status: CouponStatus,
    pub actual_win: Option<Decimal>,
    pub number_of_bets: i32,
    pub stake_entry_id: Option<Uuid>,
    pub settlement_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Coupon {
    /// New open coupon priced from `quote`
    pub fn open(user_id: Uuid, code: impl Into<String>, quote: &CouponQuote) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            code: code.into(),
            stake: quote.stake,
            total_coefficient: quote.total_coefficient,
            potential_payout: quote.potential_payout,
            status: CouponStatus::Open,
            actual_win: None,
            number_of_bets: quote.coefficients.len() as i32,
            stake_entry_id: None,
            settlement_entry_id: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn profit(&self) -> Decimal {
        self.potential_payout - self.stake
    }
}

/// Coupon together with its legs in placement order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponWithLegs {
    pub coupon: Coupon,
    pub leg_ids: Vec<Uuid>,
}

/// Outcome of building a coupon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponReceipt {
    pub coupon: Coupon,
    pub leg_ids: Vec<Uuid>,
    /// Legs left out because their coefficient was below the minimum
    pub dropped_legs: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::quote_coupon;
    use chrono::TimeZone;

    #[test]
    fn test_code_format() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let code = generate_code(at);
        assert!(code.starts_with("CPN20250601_"));
        let digits = &code["CPN20250601_".len()..];
        assert_eq!(digits.len(), 6);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_open_coupon_takes_quote() {
        let quote = quote_coupon(
            Decimal::new(5000, 2),
            &[Decimal::new(185, 2), Decimal::new(210, 2)],
            Decimal::new(101, 2),
        )
        .unwrap();
        let coupon = Coupon::open(Uuid::new_v4(), "CPN20250601_000001", &quote);

        assert_eq!(coupon.status, CouponStatus::Open);
        assert_eq!(coupon.number_of_bets, 2);
        assert_eq!(coupon.total_coefficient, Decimal::new(3885, 3));
        assert_eq!(coupon.potential_payout, Decimal::new(19425, 2));
        assert_eq!(coupon.profit(), Decimal::new(14425, 2));
    }
}
