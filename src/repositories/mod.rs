//! Storage seam for the wallet core.
//!
//! Every method that writes a ledger entry does so in one atomic unit together
//! with the balance aggregate and whatever record the entry belongs to (bet,
//! coupon, pending operation). Appends carry the balance the caller based its
//! decision on; a store must reject the write with [`crate::error::RepositoryError::Conflict`]
//! when the account moved in the meantime.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::RepositoryResult;
use crate::models::{
    Account, Bet, BetFilter, BetStatus, Coupon, CouponStatus, CouponWithLegs, EntryFilter,
    LedgerEntry, NewLedgerEntry, OperationKind, OperationStatus, Page, PageRequest,
    PendingOperation, UserBalance, WithdrawalMethod,
};

pub use memory::MemoryWalletStore;
pub use postgres::PgWalletStore;

/// Ledger entry together with the aggregate it produced
#[derive(Debug, Clone, PartialEq)]
pub struct Posted {
    pub entry: LedgerEntry,
    pub balance: UserBalance,
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Create-if-absent; an existing account is returned untouched
    async fn get_or_create_account(&self, user_id: Uuid, currency: &str)
        -> RepositoryResult<Account>;

    async fn get_account(&self, user_id: Uuid) -> RepositoryResult<Option<Account>>;

    /// Record the gateway customer id unless one is already set; returns the stored account
    async fn attach_gateway_customer(
        &self,
        user_id: Uuid,
        customer_ref: &str,
    ) -> RepositoryResult<Account>;

    // =========================================================================
    // Balance and ledger
    // =========================================================================

    /// Current aggregate, zero if the account never moved funds
    async fn get_balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance>;

    /// Append one entry and update the aggregate atomically
    async fn append_entry(&self, entry: NewLedgerEntry) -> RepositoryResult<Posted>;

    async fn get_entry(&self, entry_id: Uuid) -> RepositoryResult<Option<LedgerEntry>>;

    /// Newest first
    async fn list_entries(
        &self,
        user_id: Uuid,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<LedgerEntry>>;

    /// Every entry for the account in ledger order, for replay
    async fn entries_in_order(&self, user_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>>;

    // =========================================================================
    // Pending operations
    // =========================================================================

    async fn insert_operation(&self, op: PendingOperation) -> RepositoryResult<PendingOperation>;

    /// Append the entry and store `op` linked to it, atomically
    async fn append_with_operation(
        &self,
        entry: NewLedgerEntry,
        op: PendingOperation,
    ) -> RepositoryResult<(Posted, PendingOperation)>;

    async fn get_operation(&self, op_id: Uuid) -> RepositoryResult<Option<PendingOperation>>;

    async fn find_operation_by_reference(
        &self,
        external_reference: &str,
    ) -> RepositoryResult<Option<PendingOperation>>;

    /// Move a pending operation to `status`, appending `entry` in the same unit.
    ///
    /// Returns `None` without touching anything when the operation is no longer
    /// pending, which is what makes repeated callbacks harmless.
    async fn resolve_operation(
        &self,
        op_id: Uuid,
        status: OperationStatus,
        entry: Option<NewLedgerEntry>,
    ) -> RepositoryResult<Option<(PendingOperation, Option<Posted>)>>;

    /// Complete a deposit that was cancelled on expiry but paid afterwards.
    ///
    /// Returns `None` when the operation is not a cancelled deposit any more.
    async fn complete_expired_deposit(
        &self,
        op_id: Uuid,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<Option<(PendingOperation, Posted)>>;

    /// Sum of pending/completed withdrawals created at or after `since`
    async fn withdrawal_usage_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Decimal>;

    /// Sum of operations of `kind` still pending
    async fn pending_total(&self, user_id: Uuid, kind: OperationKind) -> RepositoryResult<Decimal>;

    /// Cancel every pending operation of `kind` whose expiry is at or before `now`
    async fn expire_operations(
        &self,
        kind: OperationKind,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<PendingOperation>>;

    // =========================================================================
    // Withdrawal methods
    // =========================================================================

    /// Store a method; a new default replaces the user's previous default
    async fn insert_withdrawal_method(
        &self,
        method: WithdrawalMethod,
    ) -> RepositoryResult<WithdrawalMethod>;

    async fn get_withdrawal_method(
        &self,
        method_id: Uuid,
    ) -> RepositoryResult<Option<WithdrawalMethod>>;

    async fn list_withdrawal_methods(&self, user_id: Uuid)
        -> RepositoryResult<Vec<WithdrawalMethod>>;

    async fn set_withdrawal_method_verified(
        &self,
        method_id: Uuid,
        verified: bool,
    ) -> RepositoryResult<WithdrawalMethod>;

    // =========================================================================
    // Bets
    // =========================================================================

    /// Debit the stake and store the bet linked to its entry
    async fn place_bet(&self, bet: Bet, entry: NewLedgerEntry) -> RepositoryResult<(Bet, Posted)>;

    async fn get_bet(&self, bet_id: Uuid) -> RepositoryResult<Option<Bet>>;

    async fn get_bets(&self, bet_ids: &[Uuid]) -> RepositoryResult<Vec<Bet>>;

    /// Newest first
    async fn list_bets(
        &self,
        user_id: Uuid,
        filter: &BetFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Bet>>;

    async fn pending_bets_for_event(&self, event_id: i64) -> RepositoryResult<Vec<Bet>>;

    /// Move a pending bet to a terminal status and append its settlement entry.
    ///
    /// Fails with [`crate::error::RepositoryError::AlreadySettled`] once the bet left `pending`.
    async fn settle_bet(
        &self,
        bet_id: Uuid,
        status: BetStatus,
        actual_win: Option<Decimal>,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Bet, Posted)>;

    // =========================================================================
    // Coupons
    // =========================================================================

    /// Debit the coupon stake and link its legs.
    ///
    /// Fails with [`crate::error::RepositoryError::BetAlreadyInCoupon`] when a leg belongs to another open coupon.
    async fn create_coupon(
        &self,
        coupon: Coupon,
        leg_ids: &[Uuid],
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(CouponWithLegs, Posted)>;

    async fn get_coupon(&self, coupon_id: Uuid) -> RepositoryResult<Option<CouponWithLegs>>;

    async fn list_coupons(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> RepositoryResult<Page<Coupon>>;

    /// Open coupons that include any of `bet_ids`
    async fn open_coupons_with_bets(&self, bet_ids: &[Uuid])
        -> RepositoryResult<Vec<CouponWithLegs>>;

    /// Resolve an open coupon; [`crate::error::RepositoryError::AlreadySettled`] once it is terminal
    async fn settle_coupon(
        &self,
        coupon_id: Uuid,
        status: CouponStatus,
        actual_win: Option<Decimal>,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Coupon, Posted)>;
}
