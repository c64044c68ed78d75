use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{is_whole_cents, BetStatus};

/// Error types for payout calculations
#[derive(Error, Debug, PartialEq)]
pub enum OddsError {
    #[error("Invalid stake: {0}")]
    InvalidStake(String),

    #[error("No qualifying legs: {0}")]
    NoQualifyingLegs(String),
}

/// Result type for payout calculations
pub type OddsResult<T> = Result<T, OddsError>;

/// `round(stake * coefficient, 2)`
///
/// Ties round to even, matching how the platform has always quoted payouts.
pub fn potential_payout(stake: Decimal, coefficient: Decimal) -> Decimal {
    (stake * coefficient).round_dp(2)
}

/// Payout minus stake
pub fn profit(stake: Decimal, coefficient: Decimal) -> Decimal {
    potential_payout(stake, coefficient) - stake
}

/// Quote for a multi-leg coupon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponQuote {
    pub stake: Decimal,
    /// Coefficients that qualified, in input order
    pub coefficients: Vec<Decimal>,
    /// Input positions left out for being below the minimum
    pub dropped: Vec<usize>,
    pub total_coefficient: Decimal,
    pub potential_payout: Decimal,
    pub profit: Decimal,
}

/// Price a coupon from its legs' coefficients.
///
/// Legs below `min_leg` are dropped rather than failing the whole coupon. The total
/// coefficient is kept unrounded; only the payout is rounded to cents.
pub fn quote_coupon(
    stake: Decimal,
    coefficients: &[Decimal],
    min_leg: Decimal,
) -> OddsResult<CouponQuote> {
    if stake <= Decimal::ZERO {
        return Err(OddsError::InvalidStake(format!(
            "stake must be positive, got {}",
            stake
        )));
    }
    if !is_whole_cents(stake) {
        return Err(OddsError::InvalidStake(format!(
            "stake {} has sub-cent precision",
            stake
        )));
    }

    let mut kept = Vec::with_capacity(coefficients.len());
    let mut dropped = Vec::new();
    for (idx, coefficient) in coefficients.iter().enumerate() {
        if *coefficient >= min_leg {
            kept.push(*coefficient);
        } else {
            dropped.push(idx);
        }
    }

    if kept.is_empty() {
        return Err(OddsError::NoQualifyingLegs(format!(
            "every leg is below the minimum coefficient {}",
            min_leg
        )));
    }

    let total_coefficient = kept.iter().fold(Decimal::ONE, |acc, c| acc * *c);
    let potential = potential_payout(stake, total_coefficient);

    Ok(CouponQuote {
        stake,
        coefficients: kept,
        dropped,
        total_coefficient,
        potential_payout: potential,
        profit: potential - stake,
    })
}

/// Where a coupon stands given its legs' current states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponOutcome {
    /// At least one leg is still pending
    Open,
    Won(Decimal),
    Lost,
    Void,
}

/// Evaluate a coupon from `(status, coefficient)` per leg.
///
/// Any lost leg loses the coupon even while others are pending. Void legs count
/// as 1.0 and cash-out legs count as won at their placement odds.
pub fn evaluate_coupon(stake: Decimal, legs: &[(BetStatus, Decimal)]) -> CouponOutcome {
    if legs.iter().any(|(status, _)| *status == BetStatus::Lost) {
        return CouponOutcome::Lost;
    }
    if legs.iter().any(|(status, _)| *status == BetStatus::Pending) {
        return CouponOutcome::Open;
    }
    if legs.iter().all(|(status, _)| *status == BetStatus::Void) {
        return CouponOutcome::Void;
    }

    let multiplier = legs
        .iter()
        .filter(|(status, _)| matches!(status, BetStatus::Won | BetStatus::Cashout))
        .fold(Decimal::ONE, |acc, (_, c)| acc * *c);

    CouponOutcome::Won(potential_payout(stake, multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_single_bet_payout() {
        assert_eq!(potential_payout(dec("50.00"), dec("1.85")), dec("92.50"));
        assert_eq!(profit(dec("50.00"), dec("1.85")), dec("42.50"));
        assert_eq!(potential_payout(dec("10.00"), dec("2.333")), dec("23.33"));
    }

    #[test]
    fn test_two_leg_coupon() {
        let quote = quote_coupon(dec("50.00"), &[dec("1.85"), dec("2.10")], dec("1.01")).unwrap();
        assert_eq!(quote.total_coefficient, dec("3.885"));
        assert_eq!(quote.potential_payout, dec("194.25"));
        assert_eq!(quote.profit, dec("144.25"));
        assert!(quote.dropped.is_empty());
    }

    #[test]
    fn test_low_legs_are_dropped() {
        let quote = quote_coupon(
            dec("10"),
            &[dec("1.00"), dec("2.00"), dec("1.005")],
            dec("1.01"),
        )
        .unwrap();
        assert_eq!(quote.coefficients, vec![dec("2.00")]);
        assert_eq!(quote.dropped, vec![0, 2]);
        assert_eq!(quote.potential_payout, dec("20.00"));
    }

    #[test]
    fn test_boundary_leg_qualifies() {
        let quote = quote_coupon(dec("100"), &[dec("1.01")], dec("1.01")).unwrap();
        assert_eq!(quote.potential_payout, dec("101.00"));
    }

    #[test]
    fn test_coupon_rejected_without_legs_or_stake() {
        assert!(matches!(
            quote_coupon(dec("10"), &[dec("1.00")], dec("1.01")),
            Err(OddsError::NoQualifyingLegs(_))
        ));
        assert!(matches!(
            quote_coupon(dec("10"), &[], dec("1.01")),
            Err(OddsError::NoQualifyingLegs(_))
        ));
        assert!(matches!(
            quote_coupon(Decimal::ZERO, &[dec("2.00")], dec("1.01")),
            Err(OddsError::InvalidStake(_))
        ));
        assert!(matches!(
            quote_coupon(dec("10.005"), &[dec("2.00")], dec("1.01")),
            Err(OddsError::InvalidStake(_))
        ));
    }

    #[test]
    fn test_evaluate_coupon_states() {
        let stake = dec("50.00");
        let a = dec("1.85");
        let b = dec("2.10");

        assert_eq!(
            evaluate_coupon(stake, &[(BetStatus::Won, a), (BetStatus::Pending, b)]),
            CouponOutcome::Open
        );
        assert_eq!(
            evaluate_coupon(stake, &[(BetStatus::Lost, a), (BetStatus::Pending, b)]),
            CouponOutcome::Lost
        );
        assert_eq!(
            evaluate_coupon(stake, &[(BetStatus::Won, a), (BetStatus::Won, b)]),
            CouponOutcome::Won(dec("194.25"))
        );
        assert_eq!(
            evaluate_coupon(stake, &[(BetStatus::Won, a), (BetStatus::Void, b)]),
            CouponOutcome::Won(dec("92.50"))
        );
        assert_eq!(
            evaluate_coupon(stake, &[(BetStatus::Cashout, a), (BetStatus::Won, b)]),
            CouponOutcome::Won(dec("194.25"))
        );
        assert_eq!(
            evaluate_coupon(stake, &[(BetStatus::Void, a), (BetStatus::Void, b)]),
            CouponOutcome::Void
        );
    }
}
