use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Bet, BetResolution, BetStatus, Coupon, CouponStatus, CouponWithLegs, EntryKind, EntryStatus,
    LedgerEntry, NewLedgerEntry,
};
use crate::odds::{self, CouponOutcome};
use crate::repositories::Posted;
use crate::services::ledger_service::{log_posted, LedgerService};

/// Result of settling one bet
#[derive(Debug, Clone, Serialize)]
pub struct BetSettlement {
    pub bet: Bet,
    pub entry: LedgerEntry,
    /// Coupons that reached a terminal state because of this bet
    pub resolved_coupons: Vec<Coupon>,
}

/// Result of settling every pending bet on an event
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventSettlement {
    pub event_id: i64,
    pub winning_selection: String,
    pub settled: Vec<Bet>,
    /// Bets that could not be settled, with the reason
    pub failed: Vec<(Uuid, String)>,
    pub resolved_coupons: Vec<Coupon>,
}

/// Ledger effect of resolving a single bet
fn bet_entry(bet: &Bet, resolution: BetResolution, balance: Decimal) -> (NewLedgerEntry, Decimal) {
    let (kind, amount, description) = match resolution {
        BetResolution::Won => (EntryKind::BetWon, bet.potential_payout, "Bet won".to_string()),
        BetResolution::Lost => (EntryKind::BetLost, Decimal::ZERO, "Bet lost".to_string()),
        BetResolution::Void => (EntryKind::BetRefund, bet.stake, "Bet void, stake refunded".to_string()),
        BetResolution::Cashout(value) => (EntryKind::BetWon, value, "Cash-out".to_string()),
    };

    let entry = NewLedgerEntry::new(bet.user_id, kind, amount, EntryStatus::Completed, balance)
        .releasing(bet.stake)
        .with_reference(bet.id.to_string())
        .with_description(description);
    (entry, amount)
}

/// Ledger effect of a coupon outcome; `None` while legs are still open
fn coupon_entry(
    coupon: &Coupon,
    outcome: CouponOutcome,
    balance: Decimal,
) -> Option<(NewLedgerEntry, CouponStatus, Decimal)> {
    let (kind, amount, status, description) = match outcome {
        CouponOutcome::Open => return None,
        CouponOutcome::Won(win) => (EntryKind::CouponWon, win, CouponStatus::Won, "Coupon won"),
        CouponOutcome::Lost => (
            EntryKind::CouponLost,
            Decimal::ZERO,
            CouponStatus::Lost,
            "Coupon lost",
        ),
        CouponOutcome::Void => (
            EntryKind::BetRefund,
            coupon.stake,
            CouponStatus::Void,
            "Coupon void, stake refunded",
        ),
    };

    let entry = NewLedgerEntry::new(coupon.user_id, kind, amount, EntryStatus::Completed, balance)
        .releasing(coupon.stake)
        .with_reference(coupon.code.clone())
        .with_description(description);
    Some((entry, status, amount))
}

/// Settlement engine for bets and coupons
pub struct SettlementService {
    ledger: Arc<LedgerService>,
}

impl SettlementService {
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }

    /// Resolve a pending bet exactly once, then any coupon it completes
    pub async fn settle_bet(
        &self,
        bet_id: Uuid,
        resolution: BetResolution,
    ) -> AppResult<BetSettlement> {
        info!("Settling bet {} as {}", bet_id, resolution.status());

        if let BetResolution::Cashout(value) = resolution {
            if value < Decimal::ZERO {
                return Err(AppError::Validation(format!(
                    "Cash-out amount must not be negative, got {}",
                    value
                )));
            }
        }

        let store = self.ledger.store();
        let bet = store
            .get_bet(bet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Bet {}", bet_id)))?;
        if bet.status.is_terminal() {
            warn!("Bet {} is already {}", bet_id, bet.status);
            return Err(AppError::AlreadySettled(format!(
                "Bet {} is already {}",
                bet_id, bet.status
            )));
        }

        let (settled, posted) = self.settle_single(&bet, resolution).await?;
        let resolved_coupons = self.evaluate_coupons_for(&[settled.id]).await?;

        Ok(BetSettlement {
            bet: settled,
            entry: posted.entry,
            resolved_coupons,
        })
    }

    /// Close a pending bet early for `amount`
    pub async fn cashout(&self, bet_id: Uuid, amount: Decimal) -> AppResult<BetSettlement> {
        self.settle_bet(bet_id, BetResolution::Cashout(amount)).await
    }

    /// Settle every pending bet on an event: the winning selection wins, the rest lose.
    ///
    /// Bets are settled independently; one failure does not stop the others.
    pub async fn settle_event(
        &self,
        event_id: i64,
        winning_selection: &str,
    ) -> AppResult<EventSettlement> {
        let pending = self.ledger.store().pending_bets_for_event(event_id).await?;
        info!(
            "Settling event {} with winner '{}': {} pending bets",
            event_id,
            winning_selection,
            pending.len()
        );

        let mut result = EventSettlement {
            event_id,
            winning_selection: winning_selection.to_string(),
            ..Default::default()
        };

        let mut touched = Vec::with_capacity(pending.len());
        for bet in pending {
            let resolution = if bet.selection == winning_selection {
                BetResolution::Won
            } else {
                BetResolution::Lost
            };

            match self.settle_single(&bet, resolution).await {
                Ok((settled, _)) => {
                    touched.push(settled.id);
                    result.settled.push(settled);
                }
                Err(e) => {
                    error!("Failed to settle bet {} on event {}: {}", bet.id, event_id, e);
                    result.failed.push((bet.id, e.to_string()));
                }
            }
        }

        result.resolved_coupons = self.evaluate_coupons_for(&touched).await?;
        info!(
            "Event {} settled: {} bets, {} failed, {} coupons resolved",
            event_id,
            result.settled.len(),
            result.failed.len(),
            result.resolved_coupons.len()
        );
        Ok(result)
    }

    /// Settle without re-evaluating coupons; callers batch that
    async fn settle_single(
        &self,
        bet: &Bet,
        resolution: BetResolution,
    ) -> AppResult<(Bet, Posted)> {
        let store = self.ledger.store();
        let (settled, posted) = self
            .ledger
            .with_retry(bet.user_id, "settle bet", |balance| async move {
                let (entry, actual_win) = bet_entry(bet, resolution, balance.balance);
                Ok(store
                    .settle_bet(bet.id, resolution.status(), Some(actual_win), entry)
                    .await?)
            })
            .await?;
        log_posted("settle bet", &posted);
        Ok((settled, posted))
    }

    /// Re-evaluate one open coupon; returns it when it reached a terminal state.
    ///
    /// A coupon that is already won, lost or void fails with `AlreadySettled`.
    pub async fn evaluate_coupon(&self, coupon_id: Uuid) -> AppResult<Option<Coupon>> {
        let coupon = self
            .ledger
            .store()
            .get_coupon(coupon_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Coupon {}", coupon_id)))?;
        if coupon.coupon.status.is_terminal() {
            return Err(AppError::AlreadySettled(format!(
                "Coupon {} is already {}",
                coupon.coupon.code, coupon.coupon.status
            )));
        }
        self.resolve_coupon(&coupon).await
    }

    async fn evaluate_coupons_for(&self, bet_ids: &[Uuid]) -> AppResult<Vec<Coupon>> {
        if bet_ids.is_empty() {
            return Ok(Vec::new());
        }

        let coupons = self.ledger.store().open_coupons_with_bets(bet_ids).await?;
        let mut resolved = Vec::new();
        for coupon in coupons {
            match self.resolve_coupon(&coupon).await {
                Ok(Some(done)) => resolved.push(done),
                Ok(None) => {}
                // Someone else resolved it between our read and write
                Err(AppError::AlreadySettled(_)) => {}
                // Left open; evaluate_coupon can pick it up again
                Err(e) => error!("Failed to resolve coupon {}: {}", coupon.coupon.code, e),
            }
        }
        Ok(resolved)
    }

    async fn resolve_coupon(&self, coupon: &CouponWithLegs) -> AppResult<Option<Coupon>> {
        let store = self.ledger.store();
        let bets = store.get_bets(&coupon.leg_ids).await?;
        let by_id: HashMap<Uuid, &Bet> = bets.iter().map(|b| (b.id, b)).collect();

        let mut legs = Vec::with_capacity(coupon.leg_ids.len());
        for id in &coupon.leg_ids {
            let bet = by_id
                .get(id)
                .ok_or_else(|| AppError::NotFound(format!("Coupon leg {}", id)))?;
            legs.push((bet.status, bet.coefficient));
        }

        let outcome = odds::evaluate_coupon(coupon.coupon.stake, &legs);
        if outcome == CouponOutcome::Open {
            return Ok(None);
        }

        let pending_legs = legs.iter().filter(|(s, _)| *s == BetStatus::Pending).count();
        info!(
            "Coupon {} resolves as {:?} ({} legs still pending)",
            coupon.coupon.code, outcome, pending_legs
        );

        let coupon = &coupon.coupon;
        let (settled, posted): (Coupon, Posted) = self
            .ledger
            .with_retry(coupon.user_id, "settle coupon", |balance| async move {
                let (entry, status, amount) = coupon_entry(coupon, outcome, balance.balance)
                    .ok_or_else(|| AppError::Message("coupon is still open".into()))?;
                Ok(store
                    .settle_coupon(coupon.id, status, Some(amount), entry)
                    .await?)
            })
            .await?;

        log_posted("settle coupon", &posted);
        Ok(Some(settled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet() -> Bet {
        Bet::new(Uuid::new_v4(), 7, "home", Decimal::new(185, 2), Decimal::new(5000, 2))
    }

    #[test]
    fn test_bet_entries_release_the_stake() {
        let bet = bet();
        for resolution in [
            BetResolution::Won,
            BetResolution::Lost,
            BetResolution::Void,
            BetResolution::Cashout(Decimal::new(3000, 2)),
        ] {
            let (entry, _) = bet_entry(&bet, resolution, Decimal::ZERO);
            assert_eq!(entry.locked_delta, -bet.stake);
            assert_eq!(entry.status, EntryStatus::Completed);
            assert_eq!(entry.external_reference, Some(bet.id.to_string()));
        }
    }

    #[test]
    fn test_bet_entry_amounts() {
        let bet = bet();
        assert_eq!(bet_entry(&bet, BetResolution::Won, Decimal::ZERO).1, Decimal::new(9250, 2));
        assert_eq!(bet_entry(&bet, BetResolution::Lost, Decimal::ZERO).1, Decimal::ZERO);
        assert_eq!(bet_entry(&bet, BetResolution::Void, Decimal::ZERO).1, bet.stake);

        let (entry, amount) = bet_entry(&bet, BetResolution::Cashout(Decimal::new(30, 0)), Decimal::ZERO);
        assert_eq!(entry.kind, EntryKind::BetWon);
        assert_eq!(amount, Decimal::new(30, 0));
    }

    #[test]
    fn test_open_coupon_has_no_entry() {
        let quote = odds::quote_coupon(Decimal::TEN, &[Decimal::TWO], Decimal::new(101, 2)).unwrap();
        let coupon = Coupon::open(Uuid::new_v4(), "CPN20250101_000001", &quote);
        assert!(coupon_entry(&coupon, CouponOutcome::Open, Decimal::ZERO).is_none());

        let (entry, status, _) = coupon_entry(&coupon, CouponOutcome::Void, Decimal::ZERO).unwrap();
        assert_eq!(status, CouponStatus::Void);
        assert_eq!(entry.kind, EntryKind::BetRefund);
        assert_eq!(entry.amount, Decimal::TEN);
    }
}
