use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WalletLimits;
use crate::error::{AppError, AppResult};
use crate::models::{Account, NewLedgerEntry, UserBalance};
use crate::repositories::{Posted, WalletStore};

/// Entry point for every balance-affecting write.
///
/// Workflows read the balance, decide, and hand the store an entry stamped with
/// the balance they decided on. When another writer got there first the store
/// answers `Conflict`; the whole decision is then re-run against a fresh read.
pub struct LedgerService {
    store: Arc<dyn WalletStore>,
    limits: WalletLimits,
}

impl LedgerService {
    pub fn new(store: Arc<dyn WalletStore>, limits: WalletLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub fn limits(&self) -> &WalletLimits {
        &self.limits
    }

    /// Create-if-absent account in the configured currency
    pub async fn ensure_account(&self, user_id: Uuid) -> AppResult<Account> {
        Ok(self
            .store
            .get_or_create_account(user_id, &self.limits.currency)
            .await?)
    }

    /// Run `attempt` against a fresh balance until it stops conflicting.
    ///
    /// Gives up with `AppError::Conflict` after `max_conflict_retries` retries.
    /// Any other outcome, success or error, is returned as is.
    pub async fn with_retry<T, F, Fut>(
        &self,
        user_id: Uuid,
        operation: &str,
        mut attempt: F,
    ) -> AppResult<T>
    where
        F: FnMut(UserBalance) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let max_retries = self.limits.max_conflict_retries;
        let mut retries = 0u32;

        loop {
            let balance = self.store.get_balance(user_id).await?;
            match attempt(balance).await {
                Err(AppError::Conflict(reason)) => {
                    if retries >= max_retries {
                        warn!(
                            "{} for user {} still conflicting after {} retries: {}",
                            operation, user_id, retries, reason
                        );
                        return Err(AppError::Conflict(format!(
                            "{} gave up after {} retries: {}",
                            operation, retries, reason
                        )));
                    }
                    retries += 1;
                    warn!(
                        "{} for user {} hit a concurrent update (retry {}/{}): {}",
                        operation, user_id, retries, max_retries, reason
                    );
                }
                other => return other,
            }
        }
    }

    /// Append a single entry built from the current balance
    pub async fn post<F>(&self, user_id: Uuid, operation: &str, mut build: F) -> AppResult<Posted>
    where
        F: FnMut(&UserBalance) -> AppResult<NewLedgerEntry>,
    {
        let store = &self.store;
        let posted = self
            .with_retry(user_id, operation, |balance| {
                let entry = build(&balance);
                async move { Ok(store.append_entry(entry?).await?) }
            })
            .await?;

        log_posted(operation, &posted);
        Ok(posted)
    }
}

/// One line per append, enough to follow a balance through the log
pub fn log_posted(operation: &str, posted: &Posted) {
    let entry = &posted.entry;
    info!(
        "{}: entry {} ({} {}) user {} amount {} balance {} -> {}",
        operation,
        entry.id,
        entry.kind,
        entry.status,
        entry.user_id,
        entry.amount,
        entry.balance_before,
        entry.balance_after
    );
    debug!(
        "user {} locked {} version {}",
        posted.balance.user_id, posted.balance.locked_in_bets, posted.balance.version
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, EntryStatus};
    use crate::repositories::MemoryWalletStore;
    use rust_decimal::Decimal;

    fn service(store: Arc<MemoryWalletStore>) -> LedgerService {
        LedgerService::new(store, WalletLimits::default())
    }

    fn credit(balance: &UserBalance, amount: i64) -> AppResult<NewLedgerEntry> {
        Ok(NewLedgerEntry::new(
            balance.user_id,
            EntryKind::Adjustment,
            Decimal::new(amount, 0),
            EntryStatus::Completed,
            balance.balance,
        ))
    }

    #[tokio::test]
    async fn test_post_appends_against_current_balance() {
        let store = Arc::new(MemoryWalletStore::new());
        let ledger = service(store.clone());
        let user = Uuid::new_v4();

        ledger.post(user, "credit", |b| credit(b, 100)).await.unwrap();
        let posted = ledger.post(user, "credit", |b| credit(b, 50)).await.unwrap();

        assert_eq!(posted.entry.balance_before, Decimal::new(100, 0));
        assert_eq!(posted.balance.balance, Decimal::new(150, 0));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let store = Arc::new(MemoryWalletStore::new());
        let ledger = service(store.clone());
        let user = Uuid::new_v4();

        store.inject_conflicts(3);
        let posted = ledger.post(user, "credit", |b| credit(b, 10)).await.unwrap();
        assert_eq!(posted.balance.balance, Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(MemoryWalletStore::new());
        let ledger = service(store.clone());
        let user = Uuid::new_v4();

        store.inject_conflicts(4);
        let err = ledger.post(user, "credit", |b| credit(b, 10)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.get_balance(user).await.unwrap().balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_builder_errors_are_not_retried() {
        let store = Arc::new(MemoryWalletStore::new());
        let ledger = service(store);
        let mut calls = 0;

        let err = ledger
            .post(Uuid::new_v4(), "noop", |_| {
                calls += 1;
                Err(AppError::Validation("nope".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(calls, 1);
    }
}
