pub mod balance_service;
pub mod betting_service;
pub mod deposit_service;
pub mod history_service;
pub mod ledger_service;
pub mod settlement;
pub mod withdrawal_service;

pub use balance_service::BalanceService;
pub use betting_service::BettingService;
pub use deposit_service::{CallbackOutcome, DepositOutcome, DepositService};
pub use history_service::HistoryService;
pub use ledger_service::LedgerService;
pub use settlement::{BetSettlement, EventSettlement, SettlementService};
pub use withdrawal_service::{WithdrawalReceipt, WithdrawalService};
