use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    generate_code, Bet, BetStatus, Coupon, CouponReceipt, EntryKind, EntryStatus,
    NewLedgerEntry,
};
use crate::odds;
use crate::repositories::Posted;
use crate::services::ledger_service::{log_posted, LedgerService};

/// Bet and coupon placement; stakes leave the balance and are locked until settlement
pub struct BettingService {
    ledger: Arc<LedgerService>,
}

impl BettingService {
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }

    /// Place a single bet at the given odds
    pub async fn place_bet(
        &self,
        user_id: Uuid,
        event_id: i64,
        selection: &str,
        coefficient: Decimal,
        stake: Decimal,
    ) -> AppResult<(Bet, Posted)> {
        info!(
            "Placing bet: user={}, event={}, selection={}, coefficient={}, stake={}",
            user_id, event_id, selection, coefficient, stake
        );

        let bet = Bet::new(user_id, event_id, selection, coefficient, stake);
        bet.validate().map_err(AppError::Validation)?;

        let store = self.ledger.store();
        let bet = &bet;
        let (bet, posted) = self
            .ledger
            .with_retry(user_id, "place bet", |balance| async move {
                if stake > balance.balance {
                    return Err(AppError::InsufficientFunds {
                        available: balance.balance,
                        requested: stake,
                    });
                }
                let entry = NewLedgerEntry::new(
                    user_id,
                    EntryKind::BetPlaced,
                    -stake,
                    EntryStatus::Completed,
                    balance.balance,
                )
                .locking(stake)
                .with_reference(bet.id.to_string())
                .with_description(format!("Bet on event {}: {}", bet.event_id, bet.selection));

                Ok(store.place_bet(bet.clone(), entry).await?)
            })
            .await?;

        log_posted("place bet", &posted);
        Ok((bet, posted))
    }

    /// Combine existing bets of one user into a coupon.
    ///
    /// Legs below the minimum coefficient are left out and reported back.
    pub async fn build_coupon(
        &self,
        user_id: Uuid,
        bet_ids: &[Uuid],
        stake: Decimal,
    ) -> AppResult<CouponReceipt> {
        info!(
            "Building coupon: user={}, legs={}, stake={}",
            user_id,
            bet_ids.len(),
            stake
        );

        if bet_ids.is_empty() {
            return Err(AppError::Validation("Coupon needs at least one bet".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = bet_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(AppError::Validation(format!("Bet {} listed twice", dup)));
        }

        let store = self.ledger.store();
        let found = store.get_bets(bet_ids).await?;

        // Keep the caller's leg order
        let mut legs = Vec::with_capacity(bet_ids.len());
        for id in bet_ids {
            let bet = found
                .iter()
                .find(|b| b.id == *id)
                .ok_or_else(|| AppError::NotFound(format!("Bet {}", id)))?;
            if bet.user_id != user_id {
                return Err(AppError::Validation(format!(
                    "Bet {} belongs to another user",
                    id
                )));
            }
            if bet.status != BetStatus::Pending {
                return Err(AppError::Validation(format!(
                    "Bet {} is already {}",
                    id, bet.status
                )));
            }
            legs.push(bet);
        }

        let coefficients: Vec<Decimal> = legs.iter().map(|b| b.coefficient).collect();
        let quote = odds::quote_coupon(stake, &coefficients, self.ledger.limits().min_leg_coefficient)?;

        let dropped_legs: Vec<Uuid> = quote.dropped.iter().map(|idx| legs[*idx].id).collect();
        let leg_ids: Vec<Uuid> = legs
            .iter()
            .enumerate()
            .filter(|(idx, _)| !quote.dropped.contains(idx))
            .map(|(_, b)| b.id)
            .collect();
        if !dropped_legs.is_empty() {
            warn!(
                "Dropped {} coupon legs below coefficient {}",
                dropped_legs.len(),
                self.ledger.limits().min_leg_coefficient
            );
        }

        let coupon = Coupon::open(user_id, generate_code(Utc::now()), &quote);
        let coupon = &coupon;
        let kept = leg_ids.as_slice();

        let (created, posted) = self
            .ledger
            .with_retry(user_id, "build coupon", |balance| async move {
                if stake > balance.balance {
                    return Err(AppError::InsufficientFunds {
                        available: balance.balance,
                        requested: stake,
                    });
                }
                let entry = NewLedgerEntry::new(
                    user_id,
                    EntryKind::BetPlaced,
                    -stake,
                    EntryStatus::Completed,
                    balance.balance,
                )
                .locking(stake)
                .with_reference(coupon.code.clone())
                .with_description(format!("Coupon {} ({} legs)", coupon.code, kept.len()));

                Ok(store.create_coupon(coupon.clone(), kept, entry).await?)
            })
            .await?;

        log_posted("build coupon", &posted);
        info!(
            "Coupon {} created: total coefficient {}, potential payout {}",
            created.coupon.code, created.coupon.total_coefficient, created.coupon.potential_payout
        );

        Ok(CouponReceipt {
            coupon: created.coupon,
            leg_ids: created.leg_ids,
            dropped_legs,
        })
    }
}
