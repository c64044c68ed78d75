//! LooseLINE Backend Library
//!
//! Wallet core of the LooseLINE sports-betting platform: the append-only ledger,
//! the balance aggregate derived from it, deposit and withdrawal workflows, and
//! bet/coupon settlement. Exposed as a library for the binary and for tests.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod odds;
pub mod payments;
pub mod repositories;
pub mod services;
pub mod sweeper;

// Re-export commonly used types
pub use config::{AppConfig, WalletLimits};
pub use error::{AppError, AppResult, ErrorKind};

use payments::PaymentGateway;
use repositories::WalletStore;
use services::*;
use std::sync::Arc;

/// Application state containing the store and every workflow service
pub struct AppState {
    pub store: Arc<dyn WalletStore>,
    pub ledger: Arc<LedgerService>,
    pub balances: Arc<BalanceService>,
    pub deposits: Arc<DepositService>,
    pub withdrawals: Arc<WithdrawalService>,
    pub betting: Arc<BettingService>,
    pub settlement: Arc<SettlementService>,
    pub history: Arc<HistoryService>,
}

impl AppState {
    /// Wire the services over one store and one gateway
    pub fn new(
        store: Arc<dyn WalletStore>,
        gateway: Arc<dyn PaymentGateway>,
        limits: WalletLimits,
    ) -> Self {
        let currency = limits.currency.clone();
        let ledger = Arc::new(LedgerService::new(store.clone(), limits));
        let balances = Arc::new(BalanceService::new(store.clone(), currency));

        Self {
            store: store.clone(),
            ledger: ledger.clone(),
            balances: balances.clone(),
            deposits: Arc::new(DepositService::new(ledger.clone(), gateway)),
            withdrawals: Arc::new(WithdrawalService::new(ledger.clone())),
            betting: Arc::new(BettingService::new(ledger.clone())),
            settlement: Arc::new(SettlementService::new(ledger)),
            history: Arc::new(HistoryService::new(store, balances)),
        }
    }
}
