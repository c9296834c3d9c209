//! Testes de integração do livro-razão: saldos, lotes atômicos, estornos
//! e consistência com escritores concorrentes.

mod common;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use branch_ledger::{
    models::{LineItem, MovementEntry, MovementKind},
    services::{StockChangeKind, StockLine},
    AppError,
};
use common::{price, test_app};

// =============================================================================
// Saldos
// =============================================================================

#[tokio::test]
async fn test_balance_of_untouched_key_is_zero() {
    let app = test_app();
    let biz = app.business().await;
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 0);
}

#[tokio::test]
async fn test_balance_is_the_sum_of_deltas() {
    let app = test_app();
    let biz = app.business().await;

    app.restock(biz.branch.id, biz.product.id, 10).await;
    app.restock(biz.branch.id, biz.product.id, 7).await;
    app.state
        .sale_service
        .commit_stock_change(
            biz.branch.id,
            vec![StockLine {
                product_id: biz.product.id,
                delta: -3,
            }],
            StockChangeKind::Adjustment,
            Utc::now(),
            Some("Quebra".into()),
        )
        .await
        .unwrap();

    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 14);

    let movements = app
        .state
        .ledger_service
        .movements_of(biz.branch.id, biz.product.id)
        .await
        .unwrap();
    assert_eq!(movements.len(), 3);
    assert_eq!(movements.iter().map(|m| m.delta).sum::<i64>(), 14);

    let report = app
        .state
        .ledger_service
        .reconcile(biz.branch.id, biz.product.id)
        .await
        .unwrap();
    assert!(report.consistent);
    assert_eq!(report.ledger_balance, 14);
}

#[tokio::test]
async fn test_aggregate_balance_sums_the_subtree() {
    let app = test_app();
    let biz = app.business().await;
    let other = app.branch(biz.root.id, "Filial Norte").await;
    app.subscribe(other.id, biz.plan.id).await;

    app.restock(biz.branch.id, biz.product.id, 4).await;
    app.restock(other.id, biz.product.id, 6).await;
    app.restock(biz.root.id, biz.product.id, 1).await;

    let aggregate = app
        .state
        .ledger_service
        .balance_under(biz.root.id, biz.product.id)
        .await
        .unwrap();
    assert_eq!(aggregate.total, 11);
    assert_eq!(aggregate.branches.len(), 3);
}

// =============================================================================
// Validação
// =============================================================================

#[tokio::test]
async fn test_delta_sign_must_match_kind() {
    let app = test_app();
    let biz = app.business().await;

    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, biz.product.id, -1, MovementKind::Restock, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity { .. }));

    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, biz.product.id, 0, MovementKind::Adjustment, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity { .. }));
}

#[tokio::test]
async fn test_unknown_or_foreign_product_is_rejected() {
    let app = test_app();
    let biz = app.business().await;
    let stranger = app.root("Concorrente").await;
    let foreign = app.product(stranger.id, "X-1", false).await;

    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, Uuid::new_v4(), 1, MovementKind::Restock, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidProduct { .. }));

    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, foreign.id, 1, MovementKind::Restock, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidProduct { .. }));
}

#[tokio::test]
async fn test_service_products_carry_no_stock() {
    let app = test_app();
    let biz = app.business().await;
    let service = app.product(biz.root.id, "SRV-1", true).await;

    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, service.id, 1, MovementKind::Restock, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidProduct { .. }));
}

#[tokio::test]
async fn test_balance_overflow_is_rejected_without_writing() {
    let app = test_app();
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 1).await;

    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, biz.product.id, i64::MAX, MovementKind::Restock, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity { quantity: i64::MAX, .. }));

    // Pelo caminho das alterações de estoque também
    let err = app
        .state
        .sale_service
        .commit_stock_change(
            biz.branch.id,
            vec![StockLine {
                product_id: biz.product.id,
                delta: i64::MAX,
            }],
            StockChangeKind::Restock,
            Utc::now(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity { .. }));

    // Delta sem simétrico não entra
    let err = app
        .state
        .ledger_service
        .append_movement(biz.branch.id, biz.product.id, i64::MIN, MovementKind::Override, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity { .. }));

    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 1);
    let report = app
        .state
        .ledger_service
        .reconcile(biz.branch.id, biz.product.id)
        .await
        .unwrap();
    assert!(report.consistent);
    assert_eq!(report.ledger_balance, 1);
}

// =============================================================================
// Atomicidade
// =============================================================================

#[tokio::test]
async fn test_batch_is_all_or_nothing() {
    let app = test_app();
    let biz = app.business().await;
    let second = app.product(biz.root.id, "SKU-2", false).await;
    app.restock(biz.branch.id, biz.product.id, 5).await;

    let txn = Uuid::new_v4();
    let err = app
        .state
        .ledger_service
        .append_batch(vec![
            MovementEntry::new(biz.branch.id, biz.product.id, -3, MovementKind::Sale, txn),
            MovementEntry::new(biz.branch.id, second.id, -1, MovementKind::Sale, txn),
        ])
        .await
        .unwrap_err();

    match err {
        AppError::InsufficientStock { shortages } => {
            assert_eq!(shortages.len(), 1);
            assert_eq!(shortages[0].line, 1);
            assert_eq!(shortages[0].available, 0);
        }
        other => panic!("erro inesperado: {other:?}"),
    }
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 5);
    assert_eq!(app.balance(biz.branch.id, second.id).await, 0);
}

#[tokio::test]
async fn test_sale_that_oversells_one_line_aborts_entirely() {
    let app = test_app();
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 5).await;

    // 3 + 10 do mesmo produto: a segunda linha não cabe
    let err = app
        .state
        .sale_service
        .commit_sale(
            biz.branch.id,
            vec![
                LineItem::new(biz.product.id, 3, price(1000)),
                LineItem::new(biz.product.id, 10, price(1000)),
            ],
            Utc::now(),
        )
        .await
        .unwrap_err();

    match err {
        AppError::InsufficientStock { shortages } => {
            assert_eq!(shortages.len(), 1);
            assert_eq!(shortages[0].line, 1);
            assert_eq!(shortages[0].available, 2);
            assert_eq!(shortages[0].requested, 10);
        }
        other => panic!("erro inesperado: {other:?}"),
    }
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 5);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let app = test_app();
    let movements = app.state.ledger_service.append_batch(Vec::new()).await.unwrap();
    assert!(movements.is_empty());
}

// =============================================================================
// Overrides e estornos
// =============================================================================

#[tokio::test]
async fn test_override_may_leave_negative_balance() {
    let app = test_app();
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 2).await;

    let err = app
        .state
        .sale_service
        .commit_stock_change(
            biz.branch.id,
            vec![StockLine {
                product_id: biz.product.id,
                delta: -5,
            }],
            StockChangeKind::Adjustment,
            Utc::now(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { .. }));

    app.state
        .sale_service
        .commit_stock_change(
            biz.branch.id,
            vec![StockLine {
                product_id: biz.product.id,
                delta: -5,
            }],
            StockChangeKind::Override,
            Utc::now(),
            Some("Contagem física".into()),
        )
        .await
        .unwrap();
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, -3);
}

#[tokio::test]
async fn test_reversal_is_an_adjustment_and_happens_once() {
    let app = test_app();
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 8).await;

    let original = app
        .state
        .ledger_service
        .movements_of(biz.branch.id, biz.product.id)
        .await
        .unwrap()
        .remove(0);

    let reversal = app
        .state
        .sale_service
        .reverse_movement(original.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(reversal.kind, MovementKind::Adjustment);
    assert_eq!(reversal.delta, -8);
    assert_eq!(reversal.reverses, Some(original.id));
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 0);

    let err = app
        .state
        .sale_service
        .reverse_movement(original.id, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::AlreadyReversed { reversal_id, .. } if reversal_id == reversal.id
    ));

    let err = app
        .state
        .sale_service
        .reverse_movement(Uuid::new_v4(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MovementNotFound(_)));
}

// =============================================================================
// Concorrência
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_keep_balance_consistent() {
    let app = Arc::new(test_app());
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 100).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let app = Arc::clone(&app);
        let branch_id = biz.branch.id;
        let product_id = biz.product.id;
        handles.push(tokio::spawn(async move {
            let (delta, kind) = if i % 2 == 0 {
                (3, MovementKind::Restock)
            } else {
                (-2, MovementKind::Adjustment)
            };
            app.state
                .ledger_service
                .append_movement(branch_id, product_id, delta, kind, Uuid::new_v4())
                .await
                .map(|m| m.delta)
        }));
    }

    let mut applied = 0;
    for handle in handles {
        applied += handle.await.unwrap().unwrap();
    }

    let balance = app.balance(biz.branch.id, biz.product.id).await;
    assert_eq!(balance, 100 + applied);
    assert_eq!(applied, 20 * 3 - 20 * 2);

    let report = app
        .state
        .ledger_service
        .reconcile(biz.branch.id, biz.product.id)
        .await
        .unwrap();
    assert!(report.consistent);
    assert_eq!(report.running_balance, balance);
}
