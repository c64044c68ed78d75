mod helpers;

use futures::future::join_all;
use helpers::*;
use looseline_backend::error::{AppError, ErrorKind};
use looseline_backend::models::*;
use looseline_backend::repositories::*;
use looseline_backend::services::DepositOutcome;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Drive one account through every kind of movement
async fn mixed_activity(wallet: &TestWallet) -> Uuid {
    let user = wallet.funded_user(dec("1000.00")).await;
    let method = wallet.verified_method(user).await;

    wallet
        .app
        .deposits
        .deposit(user, dec("250.00"), Some("pm_card_visa"))
        .await
        .unwrap();
    wallet.gateway.decline_next_charge("insufficient funds on card");
    let _ = wallet
        .app
        .deposits
        .deposit(user, dec("80.00"), Some("pm_card_visa"))
        .await;

    let won = wallet.bet(user, 1, "home", "1.95", "40.00").await;
    let lost = wallet.bet(user, 2, "away", "2.20", "30.00").await;
    let void = wallet.bet(user, 3, "draw", "3.10", "15.00").await;
    let open = wallet.bet(user, 4, "home", "1.40", "20.00").await;
    wallet
        .app
        .betting
        .build_coupon(user, &[won.id, open.id], dec("25.00"))
        .await
        .unwrap();

    wallet.app.settlement.settle_bet(won.id, BetResolution::Won).await.unwrap();
    wallet.app.settlement.settle_bet(lost.id, BetResolution::Lost).await.unwrap();
    wallet.app.settlement.settle_bet(void.id, BetResolution::Void).await.unwrap();

    let kept = wallet
        .app
        .withdrawals
        .request_withdrawal(user, dec("100.00"), method.id)
        .await
        .unwrap();
    let reversed = wallet
        .app
        .withdrawals
        .request_withdrawal(user, dec("60.00"), method.id)
        .await
        .unwrap();
    wallet
        .app
        .withdrawals
        .confirm_withdrawal(kept.operation.id)
        .await
        .unwrap();
    wallet
        .app
        .withdrawals
        .reverse_withdrawal(reversed.operation.id, "returned by bank")
        .await
        .unwrap();

    user
}

#[tokio::test]
async fn test_aggregate_matches_replay_after_mixed_activity() {
    let wallet = TestWallet::new();
    let user = mixed_activity(&wallet).await;

    let entries = wallet.entries(user).await;
    let replayed = UserBalance::replay(user, entries.iter()).unwrap();
    let stored = wallet.balance(user).await;

    assert!(replayed.diff(&stored).is_empty(), "{:?}", replayed.diff(&stored));
    // 1000 + 250 - 40 - 30 - 15 - 20 - 25 + 78 + 15 - 100
    assert_eq!(stored.balance, dec("1113.00"));
    assert_eq!(stored.locked_in_bets, dec("45.00"));
    assert_eq!(stored.total_deposited, dec("1250.00"));
    assert_eq!(stored.total_withdrawn, dec("100.00"));
    assert_eq!(stored.wins_count, 1);
    assert_eq!(stored.losses_count, 1);

    wallet.assert_reconciled(user).await;
}

#[tokio::test]
async fn test_every_entry_is_internally_consistent_and_chained() {
    let wallet = TestWallet::new();
    let user = mixed_activity(&wallet).await;
    let entries = wallet.entries(user).await;

    let mut previous: Option<&LedgerEntry> = None;
    let mut locked = Decimal::ZERO;
    for entry in &entries {
        assert!(entry.is_consistent(), "entry {} is inconsistent", entry.id);
        assert!(entry.balance_after >= Decimal::ZERO);
        if let Some(prev) = previous {
            assert_eq!(entry.balance_before, prev.balance_after);
            assert!(entry.sequence > prev.sequence);
        }
        if entry.status.moves_balance() {
            locked += entry.locked_delta;
        }
        assert!(locked >= Decimal::ZERO);
        previous = Some(entry);
    }
    assert_eq!(locked, wallet.balance(user).await.locked_in_bets);

    let failed = entries
        .iter()
        .filter(|e| e.status == EntryStatus::Failed)
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_snapshot_statistics() {
    let wallet = TestWallet::new();
    let user = wallet.funded_user(dec("200.00")).await;
    let won = wallet.bet(user, 1, "home", "2.00", "50.00").await;
    let lost = wallet.bet(user, 2, "home", "2.00", "50.00").await;
    wallet.app.settlement.settle_bet(won.id, BetResolution::Won).await.unwrap();
    wallet.app.settlement.settle_bet(lost.id, BetResolution::Lost).await.unwrap();

    let snapshot = wallet.app.history.get_balance_snapshot(user).await.unwrap();
    assert_eq!(snapshot.balance, dec("200.00"));
    assert_eq!(snapshot.currency, "USD");
    assert_eq!(snapshot.total_bet, dec("100.00"));
    assert_eq!(snapshot.total_won, dec("100.00"));
    assert_eq!(snapshot.total_lost, dec("50.00"));
    assert_eq!(snapshot.net_profit, dec("50.00"));
    assert_eq!(snapshot.wins_count, 1);
    assert_eq!(snapshot.losses_count, 1);
    assert_eq!(snapshot.win_rate, dec("50"));
}

#[tokio::test]
async fn test_unknown_account_reads_as_zero() {
    let wallet = TestWallet::new();
    let user = Uuid::new_v4();

    let balance = wallet.app.balances.get_balance(user).await.unwrap();
    assert_eq!(balance.balance, Decimal::ZERO);
    assert_eq!(balance.version, 0);

    let report = wallet.app.balances.reconcile(user).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.entries_replayed, 0);
}

#[tokio::test]
async fn test_conflicts_are_retried() {
    let wallet = TestWallet::new();
    let user = wallet.funded_user(dec("100.00")).await;

    wallet.store.inject_conflicts(3);
    let bet = wallet.bet(user, 1, "home", "2.00", "10.00").await;
    assert_eq!(bet.status, BetStatus::Pending);
    assert_eq!(wallet.balance(user).await.balance, dec("90.00"));
    wallet.assert_reconciled(user).await;
}

#[tokio::test]
async fn test_exhausted_retries_surface_conflict() {
    let wallet = TestWallet::new();
    let user = wallet.funded_user(dec("100.00")).await;
    let method = wallet.verified_method(user).await;

    wallet.store.inject_conflicts(4);
    let err = wallet
        .app
        .withdrawals
        .request_withdrawal(user, dec("50.00"), method.id)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert!(err.is_transient());
    assert_eq!(err.status_code(), 409);

    // Nothing was half-written
    assert_eq!(wallet.balance(user).await.balance, dec("100.00"));
    assert_eq!(wallet.entries(user).await.len(), 1);
    let snapshot = wallet.app.history.get_balance_snapshot(user).await.unwrap();
    assert_eq!(snapshot.pending_withdrawals, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bets_never_overdraw() {
    let wallet = Arc::new(TestWallet::new());
    let user = wallet.funded_user(dec("100.00")).await;

    // 20 bets of 10 against a balance of 100
    let tasks = (0..20).map(|i| {
        let wallet = wallet.clone();
        tokio::spawn(async move {
            wallet
                .app
                .betting
                .place_bet(user, i, "home", dec("1.50"), dec("10.00"))
                .await
        })
    });
    let results = join_all(tasks).await;

    let mut placed: i64 = 0;
    for result in results {
        match result.expect("task panicked") {
            Ok(_) => placed += 1,
            Err(e) => assert!(
                matches!(e.kind(), ErrorKind::InsufficientFunds | ErrorKind::Conflict),
                "unexpected error: {}",
                e
            ),
        }
    }

    assert!(placed <= 10);
    let balance = wallet.balance(user).await;
    assert_eq!(balance.balance, dec("100.00") - dec("10.00") * Decimal::from(placed));
    assert_eq!(balance.locked_in_bets, dec("10.00") * Decimal::from(placed));
    assert!(balance.balance >= Decimal::ZERO);
    wallet.assert_reconciled(user).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_operations_stay_consistent() {
    let wallet = Arc::new(TestWallet::new());
    let user = wallet.funded_user(dec("500.00")).await;
    let method = wallet.verified_method(user).await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let deposit_wallet = wallet.clone();
        tasks.push(tokio::spawn(async move {
            deposit_wallet
                .app
                .deposits
                .deposit(user, dec("20.00"), Some("pm_card_visa"))
                .await
                .map(|outcome| matches!(outcome, DepositOutcome::Completed(_)))
        }));

        let withdrawal_wallet = wallet.clone();
        let method_id = method.id;
        tasks.push(tokio::spawn(async move {
            withdrawal_wallet
                .app
                .withdrawals
                .request_withdrawal(user, dec("15.00"), method_id)
                .await
                .map(|_| true)
        }));

        let bet_wallet = wallet.clone();
        tasks.push(tokio::spawn(async move {
            bet_wallet
                .app
                .betting
                .place_bet(user, i, "away", dec("2.00"), dec("5.00"))
                .await
                .map(|_| true)
        }));
    }

    for result in join_all(tasks).await {
        if let Err(e) = result.expect("task panicked") {
            assert_eq!(e.kind(), ErrorKind::Conflict, "unexpected error: {}", e);
        }
    }

    let balance = wallet.balance(user).await;
    assert!(balance.balance >= Decimal::ZERO);
    assert!(balance.locked_in_bets >= Decimal::ZERO);

    let entries = wallet.entries(user).await;
    assert!(entries.iter().all(|e| e.is_consistent()));
    for pair in entries.windows(2) {
        assert_eq!(pair[1].balance_before, pair[0].balance_after);
    }
    wallet.assert_reconciled(user).await;
}

#[tokio::test]
async fn test_direct_append_rejects_stale_balance() {
    let wallet = TestWallet::new();
    let user = wallet.funded_user(dec("100.00")).await;

    let stale = NewLedgerEntry::new(
        user,
        EntryKind::Adjustment,
        dec("5.00"),
        EntryStatus::Completed,
        dec("90.00"),
    );
    let err = wallet.store.append_entry(stale).await.unwrap_err();
    assert!(matches!(err, looseline_backend::error::RepositoryError::Conflict { .. }));

    let overdraw = NewLedgerEntry::new(
        user,
        EntryKind::Fee,
        dec("-100.01"),
        EntryStatus::Completed,
        dec("100.00"),
    );
    let err = wallet.store.append_entry(overdraw).await.unwrap_err();
    assert!(matches!(
        err,
        looseline_backend::error::RepositoryError::NegativeBalance { .. }
    ));
    assert_eq!(wallet.entries(user).await.len(), 1);
}
