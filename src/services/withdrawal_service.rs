use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    is_whole_cents, EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry, OperationKind,
    OperationStatus, PendingOperation, UserBalance, WithdrawalMethod, MONEY_SCALE,
};
use crate::services::ledger_service::{log_posted, LedgerService};

/// Accepted withdrawal request; funds are already debited
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub operation: PendingOperation,
    pub entry: LedgerEntry,
    pub balance: UserBalance,
    /// Informational only
    pub estimated_completion: DateTime<Utc>,
}

/// Start of the UTC day containing `now`
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

pub struct WithdrawalService {
    ledger: Arc<LedgerService>,
}

impl WithdrawalService {
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }

    // =========================================================================
    // Destinations
    // =========================================================================

    /// Register a payout destination; it starts unverified
    pub async fn register_method(
        &self,
        user_id: Uuid,
        method_type: &str,
        details: serde_json::Value,
        is_default: bool,
    ) -> AppResult<WithdrawalMethod> {
        if method_type.trim().is_empty() {
            return Err(AppError::Validation("Method type must not be empty".into()));
        }
        self.ledger.ensure_account(user_id).await?;

        let mut method = WithdrawalMethod::new(user_id, method_type, details);
        method.is_default = is_default;
        let method = self.ledger.store().insert_withdrawal_method(method).await?;

        info!(
            "Registered {} withdrawal method {} for user {}",
            method.method_type, method.id, user_id
        );
        Ok(method)
    }

    /// Administrative verification of a destination
    pub async fn verify_method(&self, method_id: Uuid) -> AppResult<WithdrawalMethod> {
        let method = self
            .ledger
            .store()
            .set_withdrawal_method_verified(method_id, true)
            .await?;
        info!("Withdrawal method {} verified", method_id);
        Ok(method)
    }

    pub async fn list_methods(&self, user_id: Uuid) -> AppResult<Vec<WithdrawalMethod>> {
        Ok(self.ledger.store().list_withdrawal_methods(user_id).await?)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub fn validate_amount(&self, amount: Decimal) -> AppResult<()> {
        let limits = self.ledger.limits();
        if !is_whole_cents(amount) {
            return Err(AppError::Validation(format!(
                "Amount {} has more than {} decimal places",
                amount, MONEY_SCALE
            )));
        }
        if amount < limits.min_withdrawal {
            return Err(AppError::Validation(format!(
                "Minimum withdrawal is {}",
                limits.min_withdrawal
            )));
        }
        if amount > limits.max_withdrawal {
            return Err(AppError::Validation(format!(
                "Maximum withdrawal is {}",
                limits.max_withdrawal
            )));
        }
        Ok(())
    }

    /// Debit `amount` now and leave the payout pending external processing
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method_id: Uuid,
    ) -> AppResult<WithdrawalReceipt> {
        info!(
            "Withdrawal requested: user={}, amount={}, method={}",
            user_id, amount, method_id
        );
        self.validate_amount(amount)?;

        let store = self.ledger.store();
        let method = store
            .get_withdrawal_method(method_id)
            .await?
            .filter(|m| m.belongs_to(user_id))
            .ok_or_else(|| AppError::NotFound(format!("Withdrawal method {}", method_id)))?;
        if !method.is_verified {
            warn!("Withdrawal method {} is not verified", method_id);
            return Err(AppError::NotVerified(format!(
                "Withdrawal method {} must be verified first",
                method_id
            )));
        }

        let method_type = method.method_type.as_str();
        let daily_limit = self.ledger.limits().daily_withdrawal_limit;
        let since = start_of_day(Utc::now());

        let (posted, operation) = self
            .ledger
            .with_retry(user_id, "withdrawal", |balance| async move {
                if amount > balance.balance {
                    return Err(AppError::InsufficientFunds {
                        available: balance.balance,
                        requested: amount,
                    });
                }

                let used_today = store.withdrawal_usage_since(user_id, since).await?;
                if used_today + amount > daily_limit {
                    return Err(AppError::DailyLimitExceeded {
                        limit: daily_limit,
                        used_today,
                        remaining: (daily_limit - used_today).max(Decimal::ZERO),
                    });
                }

                let operation = PendingOperation::withdrawal(user_id, amount, method_id);
                let entry = NewLedgerEntry::new(
                    user_id,
                    EntryKind::Withdrawal,
                    -amount,
                    EntryStatus::Pending,
                    balance.balance,
                )
                .with_reference(operation.external_reference.clone())
                .with_description(format!("Withdrawal via {}", method_type));

                Ok(store.append_with_operation(entry, operation).await?)
            })
            .await
            .map_err(|e| {
                warn!("Withdrawal for user {} rejected: {}", user_id, e);
                e
            })?;

        log_posted("withdrawal", &posted);
        Ok(WithdrawalReceipt {
            operation,
            entry: posted.entry,
            balance: posted.balance,
            estimated_completion: Utc::now() + self.ledger.limits().withdrawal_eta(),
        })
    }

    async fn pending_withdrawal(&self, operation_id: Uuid) -> AppResult<PendingOperation> {
        let op = self
            .ledger
            .store()
            .get_operation(operation_id)
            .await?
            .filter(|op| op.kind == OperationKind::Withdrawal)
            .ok_or_else(|| AppError::NotFound(format!("Withdrawal {}", operation_id)))?;

        if op.status.is_resolved() {
            return Err(AppError::AlreadySettled(format!(
                "Withdrawal {} is already {}",
                op.id, op.status
            )));
        }
        Ok(op)
    }

    /// Payout went through; funds were debited at request time
    pub async fn confirm_withdrawal(&self, operation_id: Uuid) -> AppResult<PendingOperation> {
        let op = self.pending_withdrawal(operation_id).await?;
        let (resolved, _) = self
            .ledger
            .store()
            .resolve_operation(op.id, OperationStatus::Completed, None)
            .await?
            .ok_or_else(|| {
                AppError::AlreadySettled(format!("Withdrawal {} was resolved concurrently", op.id))
            })?;

        info!("Withdrawal {} confirmed for user {}", resolved.id, resolved.user_id);
        Ok(resolved)
    }

    /// Payout did not happen; credit the debited funds back
    pub async fn reverse_withdrawal(
        &self,
        operation_id: Uuid,
        reason: &str,
    ) -> AppResult<(PendingOperation, LedgerEntry)> {
        let op = self.pending_withdrawal(operation_id).await?;
        let store = self.ledger.store();
        let op_ref = &op;

        let resolved = self
            .ledger
            .with_retry(op.user_id, "withdrawal reversal", |balance| async move {
                let entry = NewLedgerEntry::new(
                    op_ref.user_id,
                    EntryKind::Withdrawal,
                    op_ref.amount,
                    EntryStatus::Completed,
                    balance.balance,
                )
                .with_reference(op_ref.external_reference.clone())
                .with_description(format!("Withdrawal reversed: {}", reason));
                Ok(store
                    .resolve_operation(op_ref.id, OperationStatus::Cancelled, Some(entry))
                    .await?)
            })
            .await?;

        match resolved {
            Some((resolved, Some(posted))) => {
                log_posted("withdrawal reversal", &posted);
                Ok((resolved, posted.entry))
            }
            _ => Err(AppError::AlreadySettled(format!(
                "Withdrawal {} was resolved concurrently",
                op.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_day_is_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 17, 45, 12).unwrap();
        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap()
        );
    }
}
