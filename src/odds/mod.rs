//! Payout math for single bets and coupons

pub mod payout;

pub use payout::{
    evaluate_coupon, potential_payout, profit, quote_coupon, CouponOutcome, CouponQuote,
    OddsError, OddsResult,
};
