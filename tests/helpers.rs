#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use looseline_backend::config::{GatewayConfig, WalletLimits};
use looseline_backend::error::{AppError, AppResult};
use looseline_backend::models::*;
use looseline_backend::payments::signature;
use looseline_backend::payments::{
    ChargeOutcome, GatewayEvent, PaymentGateway, PaymentIntent, StripeGateway,
};
use looseline_backend::repositories::*;
use looseline_backend::AppState;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Shorthand for decimal literals in tests
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal literal")
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        api_base: "http://127.0.0.1:9".to_string(),
        secret_key: "sk_test".to_string(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        signature_tolerance_secs: 300,
        request_timeout_secs: 1,
    }
}

/// Scriptable payment gateway.
///
/// Callback verification goes through the real signature check so tests exercise
/// the same authentication path as production.
pub struct FakeGateway {
    verifier: StripeGateway,
    next_charge: Mutex<Option<AppResult<ChargeOutcome>>>,
    pub customers_created: AtomicUsize,
    pub intents_created: AtomicUsize,
    pub charges: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            verifier: StripeGateway::new(gateway_config(), "USD").expect("gateway client"),
            next_charge: Mutex::new(None),
            customers_created: AtomicUsize::new(0),
            intents_created: AtomicUsize::new(0),
            charges: AtomicUsize::new(0),
        }
    }

    /// Decline the next saved-instrument charge with `message`
    pub fn decline_next_charge(&self, message: &str) {
        *self.next_charge.lock().unwrap() = Some(Ok(ChargeOutcome::failed(message)));
    }

    /// Leave the next charge processing under `intent_id`
    pub fn pend_next_charge(&self, intent_id: &str) {
        *self.next_charge.lock().unwrap() = Some(Ok(ChargeOutcome::pending(intent_id)));
    }

    /// Fail the next charge at the transport level
    pub fn break_next_charge(&self, message: &str) {
        *self.next_charge.lock().unwrap() = Some(Err(AppError::ExternalGateway(message.to_string())));
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(&self, _user_id: Uuid) -> AppResult<String> {
        let n = self.customers_created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cus_test_{}", n + 1))
    }

    async fn create_intent(
        &self,
        _amount: Decimal,
        _customer_ref: Option<&str>,
        _description: &str,
    ) -> AppResult<PaymentIntent> {
        let n = self.intents_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent {
            external_id: format!("pi_test_{}_{}", n, Uuid::new_v4().simple()),
            client_token: format!("pi_test_{}_secret", n),
            status: "requires_payment_method".to_string(),
        })
    }

    async fn charge_saved_instrument(
        &self,
        _customer_ref: &str,
        _amount: Decimal,
        _instrument_ref: &str,
    ) -> AppResult<ChargeOutcome> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        match self.next_charge.lock().unwrap().take() {
            Some(scripted) => scripted,
            None => Ok(ChargeOutcome::succeeded(format!("ch_test_{}", n))),
        }
    }

    fn verify_callback(&self, raw_body: &[u8], signature_header: &str) -> AppResult<GatewayEvent> {
        self.verifier.verify_callback(raw_body, signature_header)
    }
}

/// Raw callback body plus a valid signature header for it
pub fn signed_callback(event_type: &str, intent_id: &str, amount_cents: i64) -> (Vec<u8>, String) {
    let body = serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": intent_id,
                "amount": amount_cents,
                "last_payment_error": { "message": "Your card was declined." }
            }
        }
    })
    .to_string()
    .into_bytes();
    let header = signature::signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), &body)
        .expect("sign callback");
    (body, header)
}

/// In-memory wallet with every service wired
pub struct TestWallet {
    pub store: Arc<MemoryWalletStore>,
    pub gateway: Arc<FakeGateway>,
    pub app: AppState,
}

impl TestWallet {
    pub fn new() -> Self {
        Self::with_limits(WalletLimits::default())
    }

    pub fn with_limits(limits: WalletLimits) -> Self {
        let store = Arc::new(MemoryWalletStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let app = AppState::new(store.clone(), gateway.clone(), limits);
        Self {
            store,
            gateway,
            app,
        }
    }

    /// Credit `amount` as a completed deposit, bypassing the gateway
    pub async fn fund(&self, user_id: Uuid, amount: Decimal) -> Posted {
        let current = self.store.get_balance(user_id).await.expect("balance");
        self.store
            .append_entry(
                NewLedgerEntry::new(
                    user_id,
                    EntryKind::Deposit,
                    amount,
                    EntryStatus::Completed,
                    current.balance,
                )
                .with_description("test funding"),
            )
            .await
            .expect("fund account")
    }

    /// New account holding `amount`
    pub async fn funded_user(&self, amount: Decimal) -> Uuid {
        let user_id = Uuid::new_v4();
        self.fund(user_id, amount).await;
        user_id
    }

    /// Registered and verified payout destination
    pub async fn verified_method(&self, user_id: Uuid) -> WithdrawalMethod {
        let method = self
            .app
            .withdrawals
            .register_method(
                user_id,
                "bank_transfer",
                serde_json::json!({ "iban": "DE89370400440532013000" }),
                true,
            )
            .await
            .expect("register method");
        self.app
            .withdrawals
            .verify_method(method.id)
            .await
            .expect("verify method")
    }

    pub async fn balance(&self, user_id: Uuid) -> UserBalance {
        self.store.get_balance(user_id).await.expect("balance")
    }

    pub async fn entries(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        self.store.entries_in_order(user_id).await.expect("entries")
    }

    /// Place a bet at `coefficient` on `event_id`, picking `selection`
    pub async fn bet(
        &self,
        user_id: Uuid,
        event_id: i64,
        selection: &str,
        coefficient: &str,
        stake: &str,
    ) -> Bet {
        let (bet, _) = self
            .app
            .betting
            .place_bet(user_id, event_id, selection, dec(coefficient), dec(stake))
            .await
            .expect("place bet");
        bet
    }

    /// Ledger replay must match the stored aggregate
    pub async fn assert_reconciled(&self, user_id: Uuid) {
        let report = self
            .app
            .balances
            .reconcile(user_id)
            .await
            .expect("reconcile");
        assert!(
            report.is_consistent(),
            "ledger and aggregate diverge: {:?}",
            report.mismatches
        );
    }
}
