//! Postgres implementation of [`WalletStore`].
//!
//! Every write runs in one sqlx transaction: the balance row is locked with
//! `SELECT ... FOR UPDATE`, re-checked against the caller's expected balance,
//! updated under its version, and the ledger row is inserted before commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Posted, WalletStore};
use crate::error::{RepositoryError, RepositoryResult};
use crate::models::{
    Account, BalanceDelta, Bet, BetFilter, BetStatus, Coupon, CouponStatus, CouponWithLegs,
    EntryFilter, LedgerEntry, NewLedgerEntry, OperationKind, OperationStatus, Page, PageRequest,
    PendingOperation, UserBalance, WithdrawalMethod,
};

#[derive(Clone)]
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Transaction helpers
// =============================================================================

async fn ensure_account(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> RepositoryResult<()> {
    sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("INSERT INTO user_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Append one entry inside `tx`, enforcing the expected balance
async fn post_entry(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewLedgerEntry,
) -> RepositoryResult<Posted> {
    ensure_account(tx, new.user_id).await?;

    let current = sqlx::query_as::<_, UserBalance>(
        "SELECT * FROM user_balances WHERE user_id = $1 FOR UPDATE",
    )
    .bind(new.user_id)
    .fetch_one(&mut **tx)
    .await?;

    if current.balance != new.expected_balance {
        return Err(RepositoryError::Conflict {
            expected: new.expected_balance,
            actual: current.balance,
        });
    }

    let now = Utc::now();
    let next = current.apply(&BalanceDelta::from_new_entry(new), now)?;

    let balance = sqlx::query_as::<_, UserBalance>(
        r#"
        UPDATE user_balances
        SET balance = $2, locked_in_bets = $3,
            total_deposited = $4, total_withdrawn = $5, total_bet = $6,
            total_won = $7, total_lost = $8, wins_count = $9, losses_count = $10,
            version = $11, last_transaction_at = $12, updated_at = $12
        WHERE user_id = $1 AND version = $13
        RETURNING *
        "#,
    )
    .bind(new.user_id)
    .bind(next.balance)
    .bind(next.locked_in_bets)
    .bind(next.total_deposited)
    .bind(next.total_withdrawn)
    .bind(next.total_bet)
    .bind(next.total_won)
    .bind(next.total_lost)
    .bind(next.wins_count)
    .bind(next.losses_count)
    .bind(next.version)
    .bind(now)
    .bind(current.version)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(RepositoryError::Conflict {
        expected: new.expected_balance,
        actual: current.balance,
    })?;

    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries
            (id, user_id, kind, amount, locked_delta, balance_before, balance_after,
             status, external_reference, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.user_id)
    .bind(new.kind.as_str())
    .bind(new.amount)
    .bind(new.locked_delta)
    .bind(current.balance)
    .bind(balance.balance)
    .bind(new.status.as_str())
    .bind(&new.external_reference)
    .bind(&new.description)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Posted { entry, balance })
}

async fn coupon_leg_ids(pool: &PgPool, coupon_id: Uuid) -> RepositoryResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT bet_id FROM coupon_bets WHERE coupon_id = $1 ORDER BY position",
    )
    .bind(coupon_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[async_trait]
impl WalletStore for PgWalletStore {
    // =========================================================================
    // Accounts
    // =========================================================================

    async fn get_or_create_account(
        &self,
        user_id: Uuid,
        currency: &str,
    ) -> RepositoryResult<Account> {
        sqlx::query(
            "INSERT INTO accounts (user_id, currency) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(currency)
        .execute(&self.pool)
        .await?;

        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(account)
    }

    async fn get_account(&self, user_id: Uuid) -> RepositoryResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn attach_gateway_customer(
        &self,
        user_id: Uuid,
        customer_ref: &str,
    ) -> RepositoryResult<Account> {
        sqlx::query(
            "UPDATE accounts SET gateway_customer_ref = $2 WHERE user_id = $1 AND gateway_customer_ref IS NULL",
        )
        .bind(user_id)
        .bind(customer_ref)
        .execute(&self.pool)
        .await?;

        self.get_account(user_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", user_id)))
    }

    // =========================================================================
    // Balance and ledger
    // =========================================================================

    async fn get_balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance> {
        let existing =
            sqlx::query_as::<_, UserBalance>("SELECT * FROM user_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(balance) = existing {
            return Ok(balance);
        }

        let mut tx = self.pool.begin().await?;
        ensure_account(&mut tx, user_id).await?;
        let balance =
            sqlx::query_as::<_, UserBalance>("SELECT * FROM user_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> RepositoryResult<Posted> {
        let mut tx = self.pool.begin().await?;
        let posted = post_entry(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(posted)
    }

    async fn get_entry(&self, entry_id: Uuid) -> RepositoryResult<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<LedgerEntry>> {
        const WHERE: &str = r#"
            WHERE user_id = $1
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
        "#;
        let kind = filter.kind.map(|k| k.as_str());
        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM ledger_entries {}",
            WHERE
        ))
        .bind(user_id)
        .bind(kind)
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT * FROM ledger_entries {} ORDER BY sequence DESC LIMIT $6 OFFSET $7",
            WHERE
        ))
        .bind(user_id)
        .bind(kind)
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn entries_in_order(&self, user_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE user_id = $1 ORDER BY sequence ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // =========================================================================
    // Pending operations
    // =========================================================================

    async fn insert_operation(&self, op: PendingOperation) -> RepositoryResult<PendingOperation> {
        let mut tx = self.pool.begin().await?;
        ensure_account(&mut tx, op.user_id).await?;
        let stored = insert_operation_in(&mut tx, &op).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn append_with_operation(
        &self,
        entry: NewLedgerEntry,
        mut op: PendingOperation,
    ) -> RepositoryResult<(Posted, PendingOperation)> {
        let mut tx = self.pool.begin().await?;
        let posted = post_entry(&mut tx, &entry).await?;
        op.ledger_entry_id = Some(posted.entry.id);
        let stored = insert_operation_in(&mut tx, &op).await?;
        tx.commit().await?;
        Ok((posted, stored))
    }

    async fn get_operation(&self, op_id: Uuid) -> RepositoryResult<Option<PendingOperation>> {
        let op =
            sqlx::query_as::<_, PendingOperation>("SELECT * FROM pending_operations WHERE id = $1")
                .bind(op_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(op)
    }

    async fn find_operation_by_reference(
        &self,
        external_reference: &str,
    ) -> RepositoryResult<Option<PendingOperation>> {
        let op = sqlx::query_as::<_, PendingOperation>(
            "SELECT * FROM pending_operations WHERE external_reference = $1",
        )
        .bind(external_reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(op)
    }

    async fn resolve_operation(
        &self,
        op_id: Uuid,
        status: OperationStatus,
        entry: Option<NewLedgerEntry>,
    ) -> RepositoryResult<Option<(PendingOperation, Option<Posted>)>> {
        let mut tx = self.pool.begin().await?;

        let op = sqlx::query_as::<_, PendingOperation>(
            "SELECT * FROM pending_operations WHERE id = $1 FOR UPDATE",
        )
        .bind(op_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Operation {}", op_id)))?;

        if op.status.is_resolved() {
            tx.rollback().await?;
            return Ok(None);
        }

        let posted = match &entry {
            Some(new) => Some(post_entry(&mut tx, new).await?),
            None => None,
        };

        let resolved = sqlx::query_as::<_, PendingOperation>(
            r#"
            UPDATE pending_operations
            SET status = $2, resolved_at = NOW(), ledger_entry_id = COALESCE(ledger_entry_id, $3)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(op_id)
        .bind(status.as_str())
        .bind(posted.as_ref().map(|p| p.entry.id))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((resolved, posted)))
    }

    async fn complete_expired_deposit(
        &self,
        op_id: Uuid,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<Option<(PendingOperation, Posted)>> {
        let mut tx = self.pool.begin().await?;

        let op = sqlx::query_as::<_, PendingOperation>(
            "SELECT * FROM pending_operations WHERE id = $1 FOR UPDATE",
        )
        .bind(op_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Operation {}", op_id)))?;

        if op.kind != OperationKind::Deposit || op.status != OperationStatus::Cancelled {
            tx.rollback().await?;
            return Ok(None);
        }

        let posted = post_entry(&mut tx, &entry).await?;
        let completed = sqlx::query_as::<_, PendingOperation>(
            r#"
            UPDATE pending_operations
            SET status = 'completed', resolved_at = NOW(), ledger_entry_id = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(op_id)
        .bind(posted.entry.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((completed, posted)))
    }

    async fn withdrawal_usage_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Decimal> {
        let used = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM pending_operations
            WHERE user_id = $1 AND kind = 'withdrawal'
              AND status IN ('pending', 'completed')
              AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(used)
    }

    async fn pending_total(&self, user_id: Uuid, kind: OperationKind) -> RepositoryResult<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM pending_operations
            WHERE user_id = $1 AND kind = $2 AND status = 'pending'
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn expire_operations(
        &self,
        kind: OperationKind,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<PendingOperation>> {
        let expired = sqlx::query_as::<_, PendingOperation>(
            r#"
            UPDATE pending_operations
            SET status = 'cancelled', resolved_at = $2
            WHERE kind = $1 AND status = 'pending' AND expires_at <= $2
            RETURNING *
            "#,
        )
        .bind(kind.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(expired)
    }

    // =========================================================================
    // Withdrawal methods
    // =========================================================================

    async fn insert_withdrawal_method(
        &self,
        method: WithdrawalMethod,
    ) -> RepositoryResult<WithdrawalMethod> {
        let mut tx = self.pool.begin().await?;
        ensure_account(&mut tx, method.user_id).await?;
        if method.is_default {
            sqlx::query(
                "UPDATE withdrawal_methods SET is_default = FALSE, updated_at = $2 \
                 WHERE user_id = $1 AND is_default",
            )
            .bind(method.user_id)
            .bind(method.created_at)
            .execute(&mut *tx)
            .await?;
        }
        let stored = sqlx::query_as::<_, WithdrawalMethod>(
            r#"
            INSERT INTO withdrawal_methods
                (id, user_id, method_type, details, is_verified, is_default, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(method.id)
        .bind(method.user_id)
        .bind(&method.method_type)
        .bind(&method.details)
        .bind(method.is_verified)
        .bind(method.is_default)
        .bind(method.created_at)
        .bind(method.updated_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_withdrawal_method(
        &self,
        method_id: Uuid,
    ) -> RepositoryResult<Option<WithdrawalMethod>> {
        let method =
            sqlx::query_as::<_, WithdrawalMethod>("SELECT * FROM withdrawal_methods WHERE id = $1")
                .bind(method_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(method)
    }

    async fn list_withdrawal_methods(
        &self,
        user_id: Uuid,
    ) -> RepositoryResult<Vec<WithdrawalMethod>> {
        let methods = sqlx::query_as::<_, WithdrawalMethod>(
            "SELECT * FROM withdrawal_methods WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(methods)
    }

    async fn set_withdrawal_method_verified(
        &self,
        method_id: Uuid,
        verified: bool,
    ) -> RepositoryResult<WithdrawalMethod> {
        sqlx::query_as::<_, WithdrawalMethod>(
            r#"
            UPDATE withdrawal_methods SET is_verified = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(method_id)
        .bind(verified)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Withdrawal method {}", method_id)))
    }

    // =========================================================================
    // Bets
    // =========================================================================

    async fn place_bet(&self, bet: Bet, entry: NewLedgerEntry) -> RepositoryResult<(Bet, Posted)> {
        let mut tx = self.pool.begin().await?;
        let posted = post_entry(&mut tx, &entry).await?;

        let stored = sqlx::query_as::<_, Bet>(
            r#"
            INSERT INTO bets
                (id, user_id, event_id, selection, coefficient, stake, potential_payout,
                 status, stake_entry_id, placed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(bet.id)
        .bind(bet.user_id)
        .bind(bet.event_id)
        .bind(&bet.selection)
        .bind(bet.coefficient)
        .bind(bet.stake)
        .bind(bet.potential_payout)
        .bind(bet.status.as_str())
        .bind(posted.entry.id)
        .bind(bet.placed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((stored, posted))
    }

    async fn get_bet(&self, bet_id: Uuid) -> RepositoryResult<Option<Bet>> {
        let bet = sqlx::query_as::<_, Bet>("SELECT * FROM bets WHERE id = $1")
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(bet)
    }

    async fn get_bets(&self, bet_ids: &[Uuid]) -> RepositoryResult<Vec<Bet>> {
        let rows = sqlx::query_as::<_, Bet>("SELECT * FROM bets WHERE id = ANY($1)")
            .bind(bet_ids)
            .fetch_all(&self.pool)
            .await?;
        // Keep the caller's order
        Ok(bet_ids
            .iter()
            .filter_map(|id| rows.iter().find(|b| b.id == *id).cloned())
            .collect())
    }

    async fn list_bets(
        &self,
        user_id: Uuid,
        filter: &BetFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Bet>> {
        const WHERE: &str = r#"
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::bigint IS NULL OR event_id = $3)
              AND ($4::timestamptz IS NULL OR placed_at >= $4)
              AND ($5::timestamptz IS NULL OR placed_at < $5)
        "#;
        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM bets {}", WHERE))
            .bind(user_id)
            .bind(status)
            .bind(filter.event_id)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, Bet>(&format!(
            "SELECT * FROM bets {} ORDER BY placed_at DESC LIMIT $6 OFFSET $7",
            WHERE
        ))
        .bind(user_id)
        .bind(status)
        .bind(filter.event_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn pending_bets_for_event(&self, event_id: i64) -> RepositoryResult<Vec<Bet>> {
        let bets = sqlx::query_as::<_, Bet>(
            "SELECT * FROM bets WHERE event_id = $1 AND status = 'pending' ORDER BY placed_at",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bets)
    }

    async fn settle_bet(
        &self,
        bet_id: Uuid,
        status: BetStatus,
        actual_win: Option<Decimal>,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Bet, Posted)> {
        let mut tx = self.pool.begin().await?;

        let bet = sqlx::query_as::<_, Bet>("SELECT * FROM bets WHERE id = $1 FOR UPDATE")
            .bind(bet_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Bet {}", bet_id)))?;
        if bet.status.is_terminal() {
            return Err(RepositoryError::AlreadySettled(format!(
                "Bet {} is already {}",
                bet_id, bet.status
            )));
        }

        let posted = post_entry(&mut tx, &entry).await?;

        let settled = sqlx::query_as::<_, Bet>(
            r#"
            UPDATE bets
            SET status = $2, actual_win = $3, settlement_entry_id = $4, settled_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(bet_id)
        .bind(status.as_str())
        .bind(actual_win)
        .bind(posted.entry.id)
        .bind(posted.entry.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((settled, posted))
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    async fn create_coupon(
        &self,
        coupon: Coupon,
        leg_ids: &[Uuid],
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(CouponWithLegs, Posted)> {
        let mut tx = self.pool.begin().await?;

        // Lock the legs so two coupons cannot claim the same bet concurrently
        sqlx::query("SELECT id FROM bets WHERE id = ANY($1) FOR UPDATE")
            .bind(leg_ids)
            .execute(&mut *tx)
            .await?;

        let taken = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT cb.bet_id
            FROM coupon_bets cb
            JOIN coupons c ON c.id = cb.coupon_id
            WHERE c.status = 'open' AND cb.bet_id = ANY($1)
            LIMIT 1
            "#,
        )
        .bind(leg_ids)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(bet_id) = taken {
            return Err(RepositoryError::BetAlreadyInCoupon(bet_id));
        }

        let posted = post_entry(&mut tx, &entry).await?;

        let stored = sqlx::query_as::<_, Coupon>(
            r#"
            INSERT INTO coupons
                (id, user_id, code, stake, total_coefficient, potential_payout, status,
                 number_of_bets, stake_entry_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(coupon.id)
        .bind(coupon.user_id)
        .bind(&coupon.code)
        .bind(coupon.stake)
        .bind(coupon.total_coefficient)
        .bind(coupon.potential_payout)
        .bind(coupon.status.as_str())
        .bind(coupon.number_of_bets)
        .bind(posted.entry.id)
        .bind(coupon.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for (position, bet_id) in leg_ids.iter().enumerate() {
            sqlx::query("INSERT INTO coupon_bets (coupon_id, bet_id, position) VALUES ($1, $2, $3)")
                .bind(stored.id)
                .bind(bet_id)
                .bind(position as i32)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok((
            CouponWithLegs {
                coupon: stored,
                leg_ids: leg_ids.to_vec(),
            },
            posted,
        ))
    }

    async fn get_coupon(&self, coupon_id: Uuid) -> RepositoryResult<Option<CouponWithLegs>> {
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1")
            .bind(coupon_id)
            .fetch_optional(&self.pool)
            .await?;
        match coupon {
            Some(coupon) => {
                let leg_ids = coupon_leg_ids(&self.pool, coupon.id).await?;
                Ok(Some(CouponWithLegs { coupon, leg_ids }))
            }
            None => Ok(None),
        }
    }

    async fn list_coupons(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> RepositoryResult<Page<Coupon>> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM coupons WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let items = sqlx::query_as::<_, Coupon>(
            "SELECT * FROM coupons WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn open_coupons_with_bets(
        &self,
        bet_ids: &[Uuid],
    ) -> RepositoryResult<Vec<CouponWithLegs>> {
        let coupons = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT c.* FROM coupons c
            WHERE c.status = 'open'
              AND EXISTS (
                  SELECT 1 FROM coupon_bets cb
                  WHERE cb.coupon_id = c.id AND cb.bet_id = ANY($1)
              )
            ORDER BY c.created_at
            "#,
        )
        .bind(bet_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(coupons.len());
        for coupon in coupons {
            let leg_ids = coupon_leg_ids(&self.pool, coupon.id).await?;
            result.push(CouponWithLegs { coupon, leg_ids });
        }
        Ok(result)
    }

    async fn settle_coupon(
        &self,
        coupon_id: Uuid,
        status: CouponStatus,
        actual_win: Option<Decimal>,
        entry: NewLedgerEntry,
    ) -> RepositoryResult<(Coupon, Posted)> {
        let mut tx = self.pool.begin().await?;

        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(coupon_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Coupon {}", coupon_id)))?;
        if coupon.status.is_terminal() {
            return Err(RepositoryError::AlreadySettled(format!(
                "Coupon {} is already {}",
                coupon.code, coupon.status
            )));
        }

        let posted = post_entry(&mut tx, &entry).await?;

        let settled = sqlx::query_as::<_, Coupon>(
            r#"
            UPDATE coupons
            SET status = $2, actual_win = $3, settlement_entry_id = $4, resolved_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(coupon_id)
        .bind(status.as_str())
        .bind(actual_win)
        .bind(posted.entry.id)
        .bind(posted.entry.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((settled, posted))
    }
}

async fn insert_operation_in(
    tx: &mut Transaction<'_, Postgres>,
    op: &PendingOperation,
) -> RepositoryResult<PendingOperation> {
    let stored = sqlx::query_as::<_, PendingOperation>(
        r#"
        INSERT INTO pending_operations
            (id, user_id, kind, amount, status, external_reference, withdrawal_method_id,
             ledger_entry_id, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(op.id)
    .bind(op.user_id)
    .bind(op.kind.as_str())
    .bind(op.amount)
    .bind(op.status.as_str())
    .bind(&op.external_reference)
    .bind(op.withdrawal_method_id)
    .bind(op.ledger_entry_id)
    .bind(op.expires_at)
    .bind(op.created_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(stored)
}
