use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    BalanceSnapshot, OperationKind, ReconciliationReport, UserBalance,
};
use crate::repositories::WalletStore;

/// Read side of the balance aggregate
pub struct BalanceService {
    store: Arc<dyn WalletStore>,
    currency: String,
}

impl BalanceService {
    pub fn new(store: Arc<dyn WalletStore>, currency: impl Into<String>) -> Self {
        Self {
            store,
            currency: currency.into(),
        }
    }

    /// Zero aggregate for accounts that never moved funds
    pub async fn get_balance(&self, user_id: Uuid) -> AppResult<UserBalance> {
        Ok(self.store.get_balance(user_id).await?)
    }

    /// Current balance plus the derived metrics and in-flight sums
    pub async fn snapshot(&self, user_id: Uuid) -> AppResult<BalanceSnapshot> {
        let balance = self.store.get_balance(user_id).await?;
        let pending_deposits = self
            .store
            .pending_total(user_id, OperationKind::Deposit)
            .await?;
        let pending_withdrawals = self
            .store
            .pending_total(user_id, OperationKind::Withdrawal)
            .await?;

        let currency = match self.store.get_account(user_id).await? {
            Some(account) => account.currency,
            None => self.currency.clone(),
        };

        Ok(BalanceSnapshot::new(
            &balance,
            currency,
            pending_deposits,
            pending_withdrawals,
        ))
    }

    /// Replay the ledger and compare it with the stored aggregate
    pub async fn reconcile(&self, user_id: Uuid) -> AppResult<ReconciliationReport> {
        let stored = self.store.get_balance(user_id).await?;
        let entries = self.store.entries_in_order(user_id).await?;

        let mut broken_entries = Vec::new();
        let mut previous_after = None;
        for entry in &entries {
            let chained = previous_after.map_or(true, |after| after == entry.balance_before);
            if !entry.is_consistent() || !chained {
                broken_entries.push(entry.id);
            }
            previous_after = Some(entry.balance_after);
        }

        let (replayed, mut mismatches) = match UserBalance::replay(user_id, &entries) {
            Ok(replayed) => {
                let mismatches = stored.diff(&replayed);
                (replayed, mismatches)
            }
            Err(e) => (
                UserBalance::zero(user_id),
                vec![format!("replay failed: {}", e)],
            ),
        };
        if !broken_entries.is_empty() {
            mismatches.push(format!("{} entries break the balance chain", broken_entries.len()));
        }

        let report = ReconciliationReport {
            user_id,
            entries_replayed: entries.len(),
            stored,
            replayed,
            broken_entries,
            mismatches,
        };

        if report.is_consistent() {
            info!(
                "Reconciled user {}: {} entries, balance {}",
                user_id, report.entries_replayed, report.stored.balance
            );
        } else {
            error!(
                "Ledger and aggregate diverge for user {}: {:?}",
                user_id, report.mismatches
            );
        }

        Ok(report)
    }
}
