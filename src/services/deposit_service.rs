use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WalletLimits;
use crate::error::{AppError, AppResult};
use crate::models::{
    is_whole_cents, EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry, OperationKind,
    OperationStatus, PendingOperation, MONEY_SCALE,
};
use crate::payments::{ChargeStatus, GatewayEvent, GatewayEventKind, PaymentGateway};
use crate::repositories::Posted;
use crate::services::ledger_service::{log_posted, LedgerService};

const DEPOSIT_DESCRIPTION: &str = "LooseLINE balance deposit";

/// Result of starting a deposit
#[derive(Debug, Clone)]
pub enum DepositOutcome {
    /// Funds arrive later through a gateway callback
    AwaitingPayment {
        operation: PendingOperation,
        client_token: String,
    },
    /// Saved instrument charged; balance already credited
    Completed(Posted),
    /// Charge accepted but not final; the gateway callback settles it
    Processing(PendingOperation),
}

/// What a gateway callback did
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Finalized {
        operation: PendingOperation,
        entry: Option<LedgerEntry>,
    },
    /// Delivered before; nothing changed
    AlreadyResolved(PendingOperation),
    /// Payment confirmed after the deposit had expired; credited late
    Recovered {
        operation: PendingOperation,
        entry: LedgerEntry,
    },
    Ignored(String),
}

pub struct DepositService {
    ledger: Arc<LedgerService>,
    gateway: Arc<dyn PaymentGateway>,
}

impl DepositService {
    pub fn new(ledger: Arc<LedgerService>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { ledger, gateway }
    }

    fn limits(&self) -> &WalletLimits {
        self.ledger.limits()
    }

    /// Amount must sit within the configured deposit bounds, inclusive
    pub fn validate_amount(&self, amount: Decimal) -> AppResult<()> {
        let limits = self.limits();
        if !is_whole_cents(amount) {
            return Err(AppError::Validation(format!(
                "Amount {} has more than {} decimal places",
                amount, MONEY_SCALE
            )));
        }
        if amount < limits.min_deposit {
            return Err(AppError::Validation(format!(
                "Minimum deposit is {}",
                limits.min_deposit
            )));
        }
        if amount > limits.max_deposit {
            return Err(AppError::Validation(format!(
                "Maximum deposit is {}",
                limits.max_deposit
            )));
        }
        Ok(())
    }

    /// Gateway customer for the account, created on first use
    pub async fn ensure_customer(&self, user_id: Uuid) -> AppResult<String> {
        let account = self.ledger.ensure_account(user_id).await?;
        if let Some(customer_ref) = account.gateway_customer_ref {
            return Ok(customer_ref);
        }

        let created = self.gateway.create_customer(user_id).await?;
        let account = self
            .ledger
            .store()
            .attach_gateway_customer(user_id, &created)
            .await?;

        // A concurrent deposit may have attached its own customer first
        let customer_ref = account.gateway_customer_ref.unwrap_or(created);
        info!("Gateway customer for user {} is {}", user_id, customer_ref);
        Ok(customer_ref)
    }

    /// Start a deposit, charging `instrument_ref` immediately when given
    pub async fn deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        instrument_ref: Option<&str>,
    ) -> AppResult<DepositOutcome> {
        info!("Deposit requested: user={}, amount={}", user_id, amount);
        self.validate_amount(amount)?;

        let customer_ref = self.ensure_customer(user_id).await?;
        match instrument_ref {
            Some(instrument) => self.charge_saved(user_id, amount, &customer_ref, instrument).await,
            None => self.create_intent(user_id, amount, &customer_ref).await,
        }
    }

    async fn create_intent(
        &self,
        user_id: Uuid,
        amount: Decimal,
        customer_ref: &str,
    ) -> AppResult<DepositOutcome> {
        let intent = self
            .gateway
            .create_intent(amount, Some(customer_ref), DEPOSIT_DESCRIPTION)
            .await?;

        let expires_at = Utc::now() + self.limits().pending_deposit_ttl();
        let operation = self
            .ledger
            .store()
            .insert_operation(PendingOperation::deposit(
                user_id,
                amount,
                intent.external_id.clone(),
                expires_at,
            ))
            .await?;

        info!(
            "Deposit {} awaiting payment {} (expires {})",
            operation.id, intent.external_id, expires_at
        );
        Ok(DepositOutcome::AwaitingPayment {
            operation,
            client_token: intent.client_token,
        })
    }

    async fn charge_saved(
        &self,
        user_id: Uuid,
        amount: Decimal,
        customer_ref: &str,
        instrument_ref: &str,
    ) -> AppResult<DepositOutcome> {
        let outcome = match self
            .gateway
            .charge_saved_instrument(customer_ref, amount, instrument_ref)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Deposit charge for user {} did not complete: {}", user_id, e);
                let message = match e {
                    AppError::ExternalGateway(message) => message,
                    other => other.to_string(),
                };
                return self.record_failed_charge(user_id, amount, message).await;
            }
        };

        match outcome.status {
            ChargeStatus::Succeeded => {
                let reference = outcome.external_charge_id;
                let posted = self
                    .ledger
                    .post(user_id, "deposit", |balance| {
                        let mut entry = NewLedgerEntry::new(
                            user_id,
                            EntryKind::Deposit,
                            amount,
                            EntryStatus::Completed,
                            balance.balance,
                        )
                        .with_description(DEPOSIT_DESCRIPTION);
                        if let Some(reference) = &reference {
                            entry = entry.with_reference(reference.clone());
                        }
                        Ok(entry)
                    })
                    .await?;
                Ok(DepositOutcome::Completed(posted))
            }
            ChargeStatus::Pending => match outcome.external_charge_id {
                Some(intent_id) => self.track_pending_charge(user_id, amount, intent_id).await,
                None => {
                    let message = "Pending charge without an intent id".to_string();
                    self.record_failed_charge(user_id, amount, message).await
                }
            },
            ChargeStatus::Failed => {
                let message = outcome
                    .error_message
                    .unwrap_or_else(|| "Payment failed".to_string());
                self.record_failed_charge(user_id, amount, message).await
            }
        }
    }

    /// Charge still settling at the gateway; wait for its callback like an intent deposit
    async fn track_pending_charge(
        &self,
        user_id: Uuid,
        amount: Decimal,
        intent_id: String,
    ) -> AppResult<DepositOutcome> {
        let expires_at = Utc::now() + self.limits().pending_deposit_ttl();
        let operation = self
            .ledger
            .store()
            .insert_operation(PendingOperation::deposit(user_id, amount, intent_id, expires_at))
            .await?;

        info!(
            "Deposit {} charged but still processing at {}",
            operation.id, operation.external_reference
        );
        Ok(DepositOutcome::Processing(operation))
    }

    /// Leave a failed entry for the audit trail and report the gateway's message
    async fn record_failed_charge(
        &self,
        user_id: Uuid,
        amount: Decimal,
        message: String,
    ) -> AppResult<DepositOutcome> {
        warn!("Deposit charge for user {} failed: {}", user_id, message);

        // Failed entries carry no balance delta
        let reason = &message;
        self.ledger
            .post(user_id, "deposit failed", |balance| {
                Ok(NewLedgerEntry::new(
                    user_id,
                    EntryKind::Deposit,
                    amount,
                    EntryStatus::Failed,
                    balance.balance,
                )
                .with_description(format!("Payment failed: {}", reason)))
            })
            .await?;

        Err(AppError::ExternalGateway(message))
    }

    /// Authenticate a raw callback, then apply it
    pub async fn handle_callback(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> AppResult<CallbackOutcome> {
        let event = self
            .gateway
            .verify_callback(raw_body, signature_header)
            .map_err(|e| {
                warn!("Rejected gateway callback: {}", e);
                e
            })?;
        self.apply_event(event).await
    }

    /// Apply an already authenticated gateway event
    pub async fn apply_event(&self, event: GatewayEvent) -> AppResult<CallbackOutcome> {
        info!(
            "Gateway event {} ({}) for {}",
            event.id,
            event.kind.as_str(),
            event.external_reference
        );

        let status = match &event.kind {
            GatewayEventKind::Succeeded => OperationStatus::Completed,
            GatewayEventKind::Failed => OperationStatus::Failed,
            GatewayEventKind::Canceled => OperationStatus::Cancelled,
            GatewayEventKind::RequiresAction | GatewayEventKind::Processing => {
                info!(
                    "Payment {} is {}, waiting",
                    event.external_reference,
                    event.kind.as_str()
                );
                return Ok(CallbackOutcome::Ignored(event.kind.as_str().to_string()));
            }
            GatewayEventKind::Other(raw) => {
                debug!("Ignoring gateway event type {}", raw);
                return Ok(CallbackOutcome::Ignored(raw.clone()));
            }
        };

        let store = self.ledger.store();
        let operation = match store
            .find_operation_by_reference(&event.external_reference)
            .await?
        {
            Some(op) if op.kind == OperationKind::Deposit => op,
            Some(op) => {
                warn!(
                    "Gateway event {} points at {} operation {}",
                    event.id, op.kind, op.id
                );
                return Ok(CallbackOutcome::Ignored(format!("not a deposit: {}", op.id)));
            }
            None => {
                warn!("No pending deposit for payment {}", event.external_reference);
                return Ok(CallbackOutcome::Ignored(format!(
                    "unknown reference {}",
                    event.external_reference
                )));
            }
        };

        // Money taken after the sweeper gave up on the deposit still belongs to the user
        let late = operation.status == OperationStatus::Cancelled
            && status == OperationStatus::Completed;
        if operation.status.is_resolved() && !late {
            info!(
                "Deposit {} already {}, callback is a no-op",
                operation.id, operation.status
            );
            return Ok(CallbackOutcome::AlreadyResolved(operation));
        }

        if let Some(amount) = event.amount {
            if amount != operation.amount {
                warn!(
                    "Payment {} reports {} but deposit {} expects {}",
                    event.external_reference, amount, operation.id, operation.amount
                );
            }
        }

        if late {
            return self.credit_late_payment(operation).await;
        }

        let failure = event
            .failure_message
            .clone()
            .unwrap_or_else(|| "Payment failed".to_string());
        let op = &operation;
        let failure = &failure;

        let resolved = self
            .ledger
            .with_retry(operation.user_id, "deposit callback", |balance| async move {
                let entry = match status {
                    OperationStatus::Completed => Some(
                        NewLedgerEntry::new(
                            op.user_id,
                            EntryKind::Deposit,
                            op.amount,
                            EntryStatus::Completed,
                            balance.balance,
                        )
                        .with_reference(op.external_reference.clone())
                        .with_description(DEPOSIT_DESCRIPTION),
                    ),
                    OperationStatus::Failed => Some(
                        NewLedgerEntry::new(
                            op.user_id,
                            EntryKind::Deposit,
                            op.amount,
                            EntryStatus::Failed,
                            balance.balance,
                        )
                        .with_reference(op.external_reference.clone())
                        .with_description(format!("Payment failed: {}", failure)),
                    ),
                    _ => None,
                };
                Ok(store.resolve_operation(op.id, status, entry).await?)
            })
            .await?;

        match resolved {
            Some((operation, posted)) => {
                if let Some(posted) = &posted {
                    log_posted("deposit callback", posted);
                }
                info!("Deposit {} is now {}", operation.id, operation.status);
                Ok(CallbackOutcome::Finalized {
                    operation,
                    entry: posted.map(|p| p.entry),
                })
            }
            None => {
                // Lost the race against another delivery of the same event
                let current = store
                    .get_operation(operation.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Operation {}", operation.id)))?;
                Ok(CallbackOutcome::AlreadyResolved(current))
            }
        }
    }

    async fn credit_late_payment(&self, operation: PendingOperation) -> AppResult<CallbackOutcome> {
        warn!(
            "Payment {} succeeded after deposit {} was cancelled, crediting {}",
            operation.external_reference, operation.id, operation.amount
        );

        let store = self.ledger.store();
        let op = &operation;
        let credited = self
            .ledger
            .with_retry(operation.user_id, "late deposit", |balance| async move {
                let entry = NewLedgerEntry::new(
                    op.user_id,
                    EntryKind::Deposit,
                    op.amount,
                    EntryStatus::Completed,
                    balance.balance,
                )
                .with_reference(op.external_reference.clone())
                .with_description(DEPOSIT_DESCRIPTION);
                Ok(store.complete_expired_deposit(op.id, entry).await?)
            })
            .await?;

        match credited {
            Some((operation, posted)) => {
                log_posted("late deposit", &posted);
                Ok(CallbackOutcome::Recovered {
                    operation,
                    entry: posted.entry,
                })
            }
            None => {
                let current = store
                    .get_operation(operation.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Operation {}", operation.id)))?;
                Ok(CallbackOutcome::AlreadyResolved(current))
            }
        }
    }

    /// Cancel pending deposits whose expiry has passed; returns them
    pub async fn expire_pending_deposits(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PendingOperation>> {
        let expired = self
            .ledger
            .store()
            .expire_operations(OperationKind::Deposit, now)
            .await
            .map_err(|e| {
                error!("Failed to expire pending deposits: {}", e);
                AppError::from(e)
            })?;

        if !expired.is_empty() {
            info!("Expired {} pending deposits", expired.len());
        }
        Ok(expired)
    }
}
