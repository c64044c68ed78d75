use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    BalanceSnapshot, Bet, BetFilter, Coupon, CouponWithLegs, EntryFilter, LedgerEntry, Page,
    PageRequest,
};
use crate::repositories::WalletStore;
use crate::services::balance_service::BalanceService;

/// Read-only view consumed by reporting; never writes
pub struct HistoryService {
    store: Arc<dyn WalletStore>,
    balances: Arc<BalanceService>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn WalletStore>, balances: Arc<BalanceService>) -> Self {
        Self { store, balances }
    }

    /// Ledger entries, newest first
    pub async fn list_entries(
        &self,
        user_id: Uuid,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> AppResult<Page<LedgerEntry>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(AppError::Validation(format!(
                    "Date range is inverted: {} > {}",
                    from, to
                )));
            }
        }
        debug!(
            "Listing entries for user {} (limit {}, offset {})",
            user_id, page.limit, page.offset
        );
        Ok(self.store.list_entries(user_id, filter, page).await?)
    }

    pub async fn get_balance_snapshot(&self, user_id: Uuid) -> AppResult<BalanceSnapshot> {
        self.balances.snapshot(user_id).await
    }

    /// Bets, newest first
    pub async fn list_bets(
        &self,
        user_id: Uuid,
        filter: &BetFilter,
        page: PageRequest,
    ) -> AppResult<Page<Bet>> {
        Ok(self.store.list_bets(user_id, filter, page).await?)
    }

    pub async fn list_coupons(&self, user_id: Uuid, page: PageRequest) -> AppResult<Page<Coupon>> {
        Ok(self.store.list_coupons(user_id, page).await?)
    }

    /// Coupon with its legs; only visible to its owner
    pub async fn get_coupon(&self, user_id: Uuid, coupon_id: Uuid) -> AppResult<CouponWithLegs> {
        self.store
            .get_coupon(coupon_id)
            .await?
            .filter(|c| c.coupon.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Coupon {}", coupon_id)))
    }
}
