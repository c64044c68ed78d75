//! Postgres-backed store tests.
//!
//! These need a live database: set `DATABASE_URL` and run with `--ignored`.

mod helpers;

use helpers::*;
use looseline_backend::config::WalletLimits;
use looseline_backend::database::{verify_schema, DatabaseError};
use looseline_backend::error::{ErrorKind, RepositoryError};
use looseline_backend::models::*;
use looseline_backend::repositories::*;
use looseline_backend::AppState;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

fn pg_app(pool: PgPool) -> (Arc<PgWalletStore>, AppState) {
    let store = Arc::new(PgWalletStore::new(pool));
    let app = AppState::new(
        store.clone(),
        Arc::new(FakeGateway::new()),
        WalletLimits::default(),
    );
    (store, app)
}

async fn pg_fund(store: &PgWalletStore, user_id: Uuid, amount: Decimal) -> Posted {
    let current = store.get_balance(user_id).await.unwrap();
    store
        .append_entry(NewLedgerEntry::new(
            user_id,
            EntryKind::Deposit,
            amount,
            EntryStatus::Completed,
            current.balance,
        ))
        .await
        .unwrap()
}

// ============================================================================
// Schema
// ============================================================================

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_migrations_ran(pool: PgPool) {
    verify_schema(&pool).await.unwrap();

    sqlx::query("DROP TABLE coupon_bets")
        .execute(&pool)
        .await
        .unwrap();
    match verify_schema(&pool).await.unwrap_err() {
        DatabaseError::MissingTables(missing) => assert_eq!(missing, vec!["coupon_bets"]),
        other => panic!("unexpected error: {}", other),
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_append_updates_aggregate(pool: PgPool) {
    let (store, _) = pg_app(pool);
    let user = Uuid::new_v4();

    let first = pg_fund(&store, user, dec("100.00")).await;
    assert_eq!(first.entry.balance_before, Decimal::ZERO);
    assert_eq!(first.balance.balance, dec("100.00"));
    assert_eq!(first.balance.version, 1);

    let second = pg_fund(&store, user, dec("25.50")).await;
    assert_eq!(second.entry.balance_before, dec("100.00"));
    assert!(second.entry.sequence > first.entry.sequence);

    let stored = store.get_balance(user).await.unwrap();
    assert_eq!(stored.balance, dec("125.50"));
    assert_eq!(stored.total_deposited, dec("125.50"));
    assert_eq!(stored.version, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_stale_append_is_rejected(pool: PgPool) {
    let (store, _) = pg_app(pool);
    let user = Uuid::new_v4();
    pg_fund(&store, user, dec("100.00")).await;

    let err = store
        .append_entry(NewLedgerEntry::new(
            user,
            EntryKind::Adjustment,
            dec("1.00"),
            EntryStatus::Completed,
            Decimal::ZERO,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict { .. }));

    let err = store
        .append_entry(NewLedgerEntry::new(
            user,
            EntryKind::Fee,
            dec("-150.00"),
            EntryStatus::Completed,
            dec("100.00"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NegativeBalance { .. }));

    assert_eq!(store.entries_in_order(user).await.unwrap().len(), 1);
}

// ============================================================================
// Workflows
// ============================================================================

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_withdrawal_and_reversal(pool: PgPool) {
    let (store, app) = pg_app(pool);
    let user = Uuid::new_v4();
    pg_fund(&store, user, dec("5000.00")).await;

    let method = app
        .withdrawals
        .register_method(user, "bank_transfer", serde_json::json!({ "iban": "X" }), true)
        .await
        .unwrap();
    let err = app
        .withdrawals
        .request_withdrawal(user, dec("100.00"), method.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotVerified);

    app.withdrawals.verify_method(method.id).await.unwrap();
    let receipt = app
        .withdrawals
        .request_withdrawal(user, dec("1000.00"), method.id)
        .await
        .unwrap();
    assert_eq!(receipt.balance.balance, dec("4000.00"));
    assert_eq!(receipt.operation.ledger_entry_id, Some(receipt.entry.id));

    let stored = store.get_operation(receipt.operation.id).await.unwrap().unwrap();
    assert_eq!(stored.ledger_entry_id, Some(receipt.entry.id));

    app.withdrawals
        .reverse_withdrawal(receipt.operation.id, "rejected")
        .await
        .unwrap();
    assert_eq!(store.get_balance(user).await.unwrap().balance, dec("5000.00"));

    let report = app.balances.reconcile(user).await.unwrap();
    assert!(report.is_consistent(), "{:?}", report.mismatches);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_deposit_callback_resolves_once(pool: PgPool) {
    let (store, app) = pg_app(pool);
    let user = Uuid::new_v4();

    let op = store
        .insert_operation(PendingOperation::deposit(
            user,
            dec("40.00"),
            "pi_pg_test".to_string(),
            chrono::Utc::now() + chrono::Duration::hours(24),
        ))
        .await
        .unwrap();

    let (body, header) = signed_callback("payment_intent.succeeded", "pi_pg_test", 4000);
    app.deposits.handle_callback(&body, &header).await.unwrap();
    app.deposits.handle_callback(&body, &header).await.unwrap();

    let resolved = store.get_operation(op.id).await.unwrap().unwrap();
    assert_eq!(resolved.status, OperationStatus::Completed);
    assert_eq!(store.get_balance(user).await.unwrap().balance, dec("40.00"));
    assert_eq!(store.entries_in_order(user).await.unwrap().len(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_deposit_paid_late_is_credited(pool: PgPool) {
    let (store, app) = pg_app(pool);
    let user = Uuid::new_v4();

    let op = store
        .insert_operation(PendingOperation::deposit(
            user,
            dec("40.00"),
            "pi_pg_late".to_string(),
            chrono::Utc::now() - chrono::Duration::minutes(1),
        ))
        .await
        .unwrap();
    let expired = app
        .deposits
        .expire_pending_deposits(chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);

    let (body, header) = signed_callback("payment_intent.succeeded", "pi_pg_late", 4000);
    app.deposits.handle_callback(&body, &header).await.unwrap();
    app.deposits.handle_callback(&body, &header).await.unwrap();

    let resolved = store.get_operation(op.id).await.unwrap().unwrap();
    assert_eq!(resolved.status, OperationStatus::Completed);
    assert!(resolved.ledger_entry_id.is_some());
    assert_eq!(store.get_balance(user).await.unwrap().balance, dec("40.00"));
    assert_eq!(store.entries_in_order(user).await.unwrap().len(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_single_default_withdrawal_method(pool: PgPool) {
    let (_, app) = pg_app(pool);
    let user = Uuid::new_v4();

    let first = app
        .withdrawals
        .register_method(user, "bank_transfer", serde_json::json!({ "iban": "X" }), true)
        .await
        .unwrap();
    let second = app
        .withdrawals
        .register_method(user, "paypal", serde_json::json!({ "email": "a@b.c" }), true)
        .await
        .unwrap();

    let methods = app.withdrawals.list_methods(user).await.unwrap();
    let defaults: Vec<Uuid> = methods.iter().filter(|m| m.is_default).map(|m| m.id).collect();
    assert_eq!(defaults, vec![second.id]);
    assert!(methods.iter().any(|m| m.id == first.id && !m.is_default));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_coupon_settlement(pool: PgPool) {
    let (store, app) = pg_app(pool);
    let user = Uuid::new_v4();
    pg_fund(&store, user, dec("1000.00")).await;

    let (first, _) = app
        .betting
        .place_bet(user, 1, "home", dec("1.85"), dec("10.00"))
        .await
        .unwrap();
    let (second, _) = app
        .betting
        .place_bet(user, 2, "away", dec("2.10"), dec("10.00"))
        .await
        .unwrap();
    let receipt = app
        .betting
        .build_coupon(user, &[first.id, second.id], dec("50.00"))
        .await
        .unwrap();
    assert_eq!(receipt.coupon.potential_payout, dec("194.25"));

    let err = app
        .betting
        .build_coupon(user, &[first.id], dec("5.00"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    app.settlement.settle_event(1, "home").await.unwrap();
    let result = app.settlement.settle_event(2, "away").await.unwrap();
    assert_eq!(result.resolved_coupons.len(), 1);

    let coupon = store.get_coupon(receipt.coupon.id).await.unwrap().unwrap();
    assert_eq!(coupon.coupon.status, CouponStatus::Won);
    assert_eq!(coupon.leg_ids.len(), 2);

    let balance = store.get_balance(user).await.unwrap();
    assert_eq!(balance.balance, dec("1163.75"));
    assert_eq!(balance.locked_in_bets, Decimal::ZERO);

    let err = app
        .settlement
        .settle_bet(first.id, BetResolution::Lost)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadySettled);
}
