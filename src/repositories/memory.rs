//! In-process implementation of [`WalletStore`].
//!
//! All state sits behind one mutex, so each trait call is a single atomic unit
//! just like a database transaction. Used by the test suite and for local runs
//! without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Posted, WalletStore};
use crate::error::{RepositoryError, RepositoryResult};
use crate::models::{
    Account, BalanceDelta, Bet, BetFilter, BetStatus, Coupon, CouponStatus, CouponWithLegs,
    EntryFilter, LedgerEntry, NewLedgerEntry, OperationKind, OperationStatus, Page, PageRequest,
    PendingOperation, UserBalance, WithdrawalMethod,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    balances: HashMap<Uuid, UserBalance>,
    /// Ordered by sequence
    entries: Vec<LedgerEntry>,
    operations: HashMap<Uuid, PendingOperation>,
    methods: HashMap<Uuid, WithdrawalMethod>,
    bets: HashMap<Uuid, Bet>,
    coupons: HashMap<Uuid, Coupon>,
    coupon_legs: HashMap<Uuid, Vec<Uuid>>,
}

impl State {
    fn balance_of(&self, user_id: Uuid) -> UserBalance {
        self.balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserBalance::zero(user_id))
    }

    /// Validate and build the entry without mutating anything
    fn prepare(&self, new: &NewLedgerEntry) -> RepositoryResult<Posted> {
        let current = self.balance_of(new.user_id);
        if current.balance != new.expected_balance {
            return Err(RepositoryError::Conflict {
                expected: new.expected_balance,
                actual: current.balance,
            });
        }

        let now = Utc::now();
        let next = current.apply(&BalanceDelta::from_new_entry(new), now)?;
        let sequence = self.entries.last().map_or(1, |e| e.sequence + 1);

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            sequence,
            user_id: new.user_id,
            kind: new.kind,
            amount: new.amount,
            locked_delta: new.locked_delta,
            balance_before: current.balance,
            balance_after: next.balance,
            status: new.status,
            external_reference: new.external_reference.clone(),
            description: new.description.clone(),
            created_at: now,
        };

        Ok(Posted {
            entry,
            balance: next,
        })
    }

    fn commit(&mut self, posted: &Posted) {
        self.accounts
            .entry(posted.balance.user_id)
            .or_insert_with(|| Account::new(posted.balance.user_id, "USD"));
        self.balances
            .insert(posted.balance.user_id, posted.balance.clone());
        self.entries.push(posted.entry.clone());
    }

    fn coupon_with_legs(&self, coupon: &Coupon) -> CouponWithLegs {
        CouponWithLegs {
            coupon: coupon.clone(),
            leg_ids: self.coupon_legs.get(&coupon.id).cloned().unwrap_or_default(),
        }
    }
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len() as i64;
    let start = (page.offset as usize).min(items.len());
    let end = (start + page.limit as usize).min(items.len());
    let items: Vec<T> = items.drain(start..end).collect();
    Page {
        items,
        total,
        limit: page.limit,
        offset: page.offset,
    }
}

#[derive(Default)]
pub struct MemoryWalletStore {
    state: Mutex<State>,
    injected_conflicts: AtomicUsize,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with a conflict, as if another writer
    /// had moved the balance first
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self, new: &NewLedgerEntry) -> RepositoryResult<()> {
        let taken = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            return Err(RepositoryError::Conflict {
                expected: new.expected_balance,
                actual: new.expected_balance,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn get_or_create_account(
        &self,
        user_id: Uuid,
        currency: &str,
    ) -> RepositoryResult<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, currency))
            .clone();
        Ok(account)
    }

    async fn get_account(&self, user_id: Uuid) -> RepositoryResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&user_id).cloned())
    }

    async fn attach_gateway_customer(
        &self,
        user_id: Uuid,
        customer_ref: &str,
    ) -> RepositoryResult<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", user_id)))?;
        if account.gateway_customer_ref.is_none() {
            account.gateway_customer_ref = Some(customer_ref.to_string());
        }
        Ok(account.clone())
    }

    async fn get_balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance> {
        let mut state = self.state.lock().await;
        let balance = state
            .balances
            .entry(user_id)
            .or_insert_with(|| UserBalance::zero(user_id))
            .clone();
        Ok(balance)
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> RepositoryResult<Posted> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;
        let posted = state.prepare(&entry)?;
        state.commit(&posted);
        Ok(posted)
    }

    async fn get_entry(&self, entry_id: Uuid) -> RepositoryResult<Option<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state.entries.iter().find(|e| e.id == entry_id).cloned())
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<LedgerEntry>> {
        let state = self.state.lock().await;
        let items: Vec<LedgerEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id && filter.matches(e))
            .cloned()
            .collect();
        Ok(paginate(items, page))
    }

    async fn entries_in_order(&self, user_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_operation(&self, op: PendingOperation) -> RepositoryResult<PendingOperation> {
        let mut state = self.state.lock().await;
        if state
            .operations
            .values()
            .any(|o| o.external_reference == op.external_reference)
        {
            return Err(RepositoryError::Duplicate(format!(
                "Operation reference {}",
                op.external_reference
            )));
        }
        state.operations.insert(op.id, op.clone());
        Ok(op)
    }

    async fn append_with_operation(
        &self,
        entry: NewLedgerEntry,
        mut op: PendingOperation,
    ) -> RepositoryResult<(Posted, PendingOperation)> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;
        if state
            .operations
            .values()
            .any(|o| o.external_reference == op.external_reference)
        {
            return Err(RepositoryError::Duplicate(format!(
                "Operation reference {}",
                op.external_reference
            )));
        }
        let posted = state.prepare(&entry)?;
        op.ledger_entry_id = Some(posted.entry.id);
        state.commit(&posted);
        state.operations.insert(op.id, op.clone());
        Ok((posted, op))
    }

    async fn get_operation(&self, op_id: Uuid) -> RepositoryResult<Option<PendingOperation>> {
        let state = self.state.lock().await;
        Ok(state.operations.get(&op_id).cloned())
    }

    async fn find_operation_by_reference(
        &self,
        external_reference: &str,
    ) -> RepositoryResult<Option<PendingOperation>> {
        let state = self.state.lock().await;
        Ok(state
            .operations
            .values()
            .find(|o| o.external_reference == external_reference)
            .cloned())
    }

    async fn resolve_operation(
        &self,
        op_id: Uuid,
        status: OperationStatus,
        entry: Option<NewLedgerEntry>,
    ) -> RepositoryResult<Option<(PendingOperation, Option<Posted>)>> {
        if let Some(new) = &entry {
            self.take_injected_conflict(new)?;
        }
        let mut state = self.state.lock().await;
        let op = state
            .operations
            .get(&op_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Operation {}", op_id)))?;
        if op.status.is_resolved() {
            return Ok(None);
        }

        let posted = match &entry {
            Some(new) => Some(state.prepare(new)?),
            None => None,
        };

        let mut resolved = op;
        resolved.status = status;
        resolved.resolved_at = Some(Utc::now());
        if let Some(posted) = &posted {
            if resolved.ledger_entry_id.is_none() {
                resolved.ledger_entry_id = Some(posted.entry.id);
            }
            state.commit(posted);
        }
        state.operations.insert(resolved.id, resolved.clone());
        Ok(Some((resolved, posted)))
    }

    async fn complete_expired_deposit(
        &self,
        op_id: Uuid,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<Option<(PendingOperation, Posted)>> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;
        let op = state
            .operations
            .get(&op_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Operation {}", op_id)))?;
        if op.kind != OperationKind::Deposit || op.status != OperationStatus::Cancelled {
            return Ok(None);
        }

        let posted = state.prepare(&entry)?;
        let mut completed = op;
        completed.status = OperationStatus::Completed;
        completed.resolved_at = Some(Utc::now());
        completed.ledger_entry_id = Some(posted.entry.id);
        state.commit(&posted);
        state.operations.insert(completed.id, completed.clone());
        Ok(Some((completed, posted)))
    }

    async fn withdrawal_usage_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .operations
            .values()
            .filter(|o| {
                o.user_id == user_id
                    && o.kind == OperationKind::Withdrawal
                    && matches!(o.status, OperationStatus::Pending | OperationStatus::Completed)
                    && o.created_at >= since
            })
            .map(|o| o.amount)
            .sum())
    }

    async fn pending_total(&self, user_id: Uuid, kind: OperationKind) -> RepositoryResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .operations
            .values()
            .filter(|o| o.user_id == user_id && o.kind == kind && o.status == OperationStatus::Pending)
            .map(|o| o.amount)
            .sum())
    }

    async fn expire_operations(
        &self,
        kind: OperationKind,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<PendingOperation>> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for op in state.operations.values_mut() {
            if op.kind == kind && op.is_expired(now) {
                op.status = OperationStatus::Cancelled;
                op.resolved_at = Some(now);
                expired.push(op.clone());
            }
        }
        Ok(expired)
    }

    async fn insert_withdrawal_method(
        &self,
        method: WithdrawalMethod,
    ) -> RepositoryResult<WithdrawalMethod> {
        let mut state = self.state.lock().await;
        if method.is_default {
            for other in state.methods.values_mut() {
                if other.user_id == method.user_id && other.is_default {
                    other.is_default = false;
                    other.updated_at = method.created_at;
                }
            }
        }
        state.methods.insert(method.id, method.clone());
        Ok(method)
    }

    async fn get_withdrawal_method(
        &self,
        method_id: Uuid,
    ) -> RepositoryResult<Option<WithdrawalMethod>> {
        let state = self.state.lock().await;
        Ok(state.methods.get(&method_id).cloned())
    }

    async fn list_withdrawal_methods(
        &self,
        user_id: Uuid,
    ) -> RepositoryResult<Vec<WithdrawalMethod>> {
        let state = self.state.lock().await;
        let mut methods: Vec<WithdrawalMethod> = state
            .methods
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        methods.sort_by_key(|m| m.created_at);
        Ok(methods)
    }

    async fn set_withdrawal_method_verified(
        &self,
        method_id: Uuid,
        verified: bool,
    ) -> RepositoryResult<WithdrawalMethod> {
        let mut state = self.state.lock().await;
        let method = state
            .methods
            .get_mut(&method_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Withdrawal method {}", method_id)))?;
        method.is_verified = verified;
        method.updated_at = Utc::now();
        Ok(method.clone())
    }

    async fn place_bet(
        &self,
        mut bet: Bet,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Bet, Posted)> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;
        let posted = state.prepare(&entry)?;
        bet.stake_entry_id = Some(posted.entry.id);
        state.commit(&posted);
        state.bets.insert(bet.id, bet.clone());
        Ok((bet, posted))
    }

    async fn get_bet(&self, bet_id: Uuid) -> RepositoryResult<Option<Bet>> {
        let state = self.state.lock().await;
        Ok(state.bets.get(&bet_id).cloned())
    }

    async fn get_bets(&self, bet_ids: &[Uuid]) -> RepositoryResult<Vec<Bet>> {
        let state = self.state.lock().await;
        Ok(bet_ids
            .iter()
            .filter_map(|id| state.bets.get(id).cloned())
            .collect())
    }

    async fn list_bets(
        &self,
        user_id: Uuid,
        filter: &BetFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Bet>> {
        let state = self.state.lock().await;
        let mut bets: Vec<Bet> = state
            .bets
            .values()
            .filter(|b| b.user_id == user_id && filter.matches(b))
            .cloned()
            .collect();
        bets.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        Ok(paginate(bets, page))
    }

    async fn pending_bets_for_event(&self, event_id: i64) -> RepositoryResult<Vec<Bet>> {
        let state = self.state.lock().await;
        let mut bets: Vec<Bet> = state
            .bets
            .values()
            .filter(|b| b.event_id == event_id && b.status == BetStatus::Pending)
            .cloned()
            .collect();
        bets.sort_by_key(|b| b.placed_at);
        Ok(bets)
    }

    async fn settle_bet(
        &self,
        bet_id: Uuid,
        status: BetStatus,
        actual_win: Option<Decimal>,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Bet, Posted)> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;
        let mut bet = state
            .bets
            .get(&bet_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Bet {}", bet_id)))?;
        if bet.status.is_terminal() {
            return Err(RepositoryError::AlreadySettled(format!(
                "Bet {} is already {}",
                bet_id, bet.status
            )));
        }

        let posted = state.prepare(&entry)?;
        bet.status = status;
        bet.actual_win = actual_win;
        bet.settlement_entry_id = Some(posted.entry.id);
        bet.settled_at = Some(posted.entry.created_at);
        state.commit(&posted);
        state.bets.insert(bet.id, bet.clone());
        Ok((bet, posted))
    }

    async fn create_coupon(
        &self,
        coupon: Coupon,
        leg_ids: &[Uuid],
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(CouponWithLegs, Posted)> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;

        for leg in leg_ids {
            let taken = state.coupons.values().any(|c| {
                c.status == CouponStatus::Open
                    && state
                        .coupon_legs
                        .get(&c.id)
                        .map_or(false, |legs| legs.contains(leg))
            });
            if taken {
                return Err(RepositoryError::BetAlreadyInCoupon(*leg));
            }
        }
        if state.coupons.values().any(|c| c.code == coupon.code) {
            return Err(RepositoryError::Duplicate(format!("Coupon code {}", coupon.code)));
        }

        let posted = state.prepare(&entry)?;
        let mut coupon = coupon;
        coupon.stake_entry_id = Some(posted.entry.id);
        state.commit(&posted);
        state.coupon_legs.insert(coupon.id, leg_ids.to_vec());
        state.coupons.insert(coupon.id, coupon.clone());

        Ok((
            CouponWithLegs {
                coupon,
                leg_ids: leg_ids.to_vec(),
            },
            posted,
        ))
    }

    async fn get_coupon(&self, coupon_id: Uuid) -> RepositoryResult<Option<CouponWithLegs>> {
        let state = self.state.lock().await;
        Ok(state.coupons.get(&coupon_id).map(|c| state.coupon_with_legs(c)))
    }

    async fn list_coupons(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> RepositoryResult<Page<Coupon>> {
        let state = self.state.lock().await;
        let mut coupons: Vec<Coupon> = state
            .coupons
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(coupons, page))
    }

    async fn open_coupons_with_bets(
        &self,
        bet_ids: &[Uuid],
    ) -> RepositoryResult<Vec<CouponWithLegs>> {
        let state = self.state.lock().await;
        let mut coupons: Vec<CouponWithLegs> = state
            .coupons
            .values()
            .filter(|c| c.status == CouponStatus::Open)
            .map(|c| state.coupon_with_legs(c))
            .filter(|c| c.leg_ids.iter().any(|id| bet_ids.contains(id)))
            .collect();
        coupons.sort_by_key(|c| c.coupon.created_at);
        Ok(coupons)
    }

    async fn settle_coupon(
        &self,
        coupon_id: Uuid,
        status: CouponStatus,
        actual_win: Option<Decimal>,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Coupon, Posted)> {
        self.take_injected_conflict(&entry)?;
        let mut state = self.state.lock().await;
        let mut coupon = state
            .coupons
            .get(&coupon_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Coupon {}", coupon_id)))?;
        if coupon.status.is_terminal() {
            return Err(RepositoryError::AlreadySettled(format!(
                "Coupon {} is already {}",
                coupon.code, coupon.status
            )));
        }

        let posted = state.prepare(&entry)?;
        coupon.status = status;
        coupon.actual_win = actual_win;
        coupon.settlement_entry_id = Some(posted.entry.id);
        coupon.resolved_at = Some(posted.entry.created_at);
        state.commit(&posted);
        state.coupons.insert(coupon.id, coupon.clone());
        Ok((coupon, posted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, EntryStatus};

    fn deposit(user_id: Uuid, amount: i64, expected: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(
            user_id,
            EntryKind::Deposit,
            Decimal::new(amount, 0),
            EntryStatus::Completed,
            Decimal::new(expected, 0),
        )
    }

    #[tokio::test]
    async fn test_append_checks_expected_balance() {
        let store = MemoryWalletStore::new();
        let user = Uuid::new_v4();

        let posted = store.append_entry(deposit(user, 100, 0)).await.unwrap();
        assert_eq!(posted.entry.balance_before, Decimal::ZERO);
        assert_eq!(posted.entry.balance_after, Decimal::new(100, 0));
        assert_eq!(posted.entry.sequence, 1);

        let err = store.append_entry(deposit(user, 50, 0)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
        assert_eq!(store.get_balance(user).await.unwrap().balance, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn test_negative_balance_leaves_state_untouched() {
        let store = MemoryWalletStore::new();
        let user = Uuid::new_v4();
        let debit = NewLedgerEntry::new(
            user,
            EntryKind::Fee,
            Decimal::new(-5, 0),
            EntryStatus::Completed,
            Decimal::ZERO,
        );
        let err = store.append_entry(debit).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NegativeBalance { .. }));
        assert!(store.entries_in_order(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_entries_is_newest_first_and_paged() {
        let store = MemoryWalletStore::new();
        let user = Uuid::new_v4();
        store.append_entry(deposit(user, 10, 0)).await.unwrap();
        store.append_entry(deposit(user, 20, 10)).await.unwrap();
        store.append_entry(deposit(user, 30, 30)).await.unwrap();

        let page = store
            .list_entries(user, &EntryFilter::default(), PageRequest::new(2, 0))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].amount, Decimal::new(30, 0));
        assert!(page.has_more());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = MemoryWalletStore::new();
        let user = Uuid::new_v4();
        store.inject_conflicts(1);
        assert!(store.append_entry(deposit(user, 10, 0)).await.is_err());
        assert!(store.append_entry(deposit(user, 10, 0)).await.is_ok());
    }
}
