//! Testes de integração do Gate: quem pode movimentar estoque, e quando.

mod common;

use chrono::{Duration, Utc};

use branch_ledger::{db::MemoryStore, models::LineItem, services::AuditEvent, AppError};
use common::{hours_ago, price, test_app, test_app_over};

// =============================================================================
// Regra básica
// =============================================================================

#[tokio::test]
async fn test_root_is_always_authorized() {
    let app = test_app();
    let root = app.root("Matriz").await;

    let auth = app
        .state
        .subscription_service
        .authorize(root.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(auth.branch_id, root.id);
    assert!(auth.subscription.is_none());
}

#[tokio::test]
async fn test_branch_without_subscription_is_denied() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let branch = app.branch(root.id, "Filial").await;

    let err = app
        .state
        .subscription_service
        .authorize(branch.id, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoActiveSubscription { .. }));

    let denied = app
        .audit
        .events()
        .into_iter()
        .any(|e| matches!(e, AuditEvent::AuthorizationDenied { branch_id, code: "NO_ACTIVE_SUBSCRIPTION", .. } if branch_id == branch.id));
    assert!(denied);
}

#[tokio::test]
async fn test_every_approval_is_audited() {
    let app = test_app();
    let biz = app.business().await;
    let gate = &app.state.subscription_service;

    // Primeira decisão avaliada, segunda vinda do cache
    gate.authorize(biz.branch.id, Utc::now()).await.unwrap();
    gate.authorize(biz.branch.id, Utc::now()).await.unwrap();

    let grants: Vec<bool> = app
        .audit
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AuditEvent::AuthorizationGranted { branch_id, cached, .. } if branch_id == biz.branch.id => Some(cached),
            _ => None,
        })
        .collect();
    assert_eq!(grants, vec![false, true]);
}

#[tokio::test]
async fn test_subscription_window_is_half_open() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let branch = app.branch(root.id, "Filial").await;
    let plan = app.plan(None).await;

    let starts = hours_ago(48);
    let ends = hours_ago(24);
    app.state
        .subscription_service
        .subscribe(branch.id, plan.id, starts, Some(ends))
        .await
        .unwrap();

    let gate = &app.state.subscription_service;
    assert!(gate.authorize(branch.id, starts).await.is_ok());
    assert!(gate.authorize(branch.id, ends - Duration::seconds(1)).await.is_ok());
    // O fim não pertence à janela, mesmo com a aprovação em cache
    assert!(matches!(
        gate.authorize(branch.id, ends).await,
        Err(AppError::NoActiveSubscription { .. })
    ));
    assert!(gate.authorize(branch.id, starts - Duration::seconds(1)).await.is_err());
}

#[tokio::test]
async fn test_overlapping_subscription_is_rejected() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let branch = app.branch(root.id, "Filial").await;
    let plan = app.plan(None).await;
    app.subscribe(branch.id, plan.id).await;

    let err = app
        .state
        .subscription_service
        .subscribe(branch.id, plan.id, hours_ago(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OverlappingSubscription { .. }));
}

#[tokio::test]
async fn test_root_cannot_subscribe() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let plan = app.plan(None).await;

    let err = app
        .state
        .subscription_service
        .subscribe(root.id, plan.id, Utc::now(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidHierarchy { .. }));
}

// =============================================================================
// Limites do plano
// =============================================================================

#[tokio::test]
async fn test_plan_limit_admits_earliest_branches() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let first = app.branch(root.id, "Primeira").await;
    let second = app.branch(root.id, "Segunda").await;
    let plan = app.plan(Some(1)).await;
    let gate = &app.state.subscription_service;

    gate.subscribe(first.id, plan.id, hours_ago(24), None).await.unwrap();
    gate.subscribe(second.id, plan.id, hours_ago(12), None).await.unwrap();

    assert!(gate.authorize(first.id, Utc::now()).await.is_ok());
    let err = gate.authorize(second.id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::PlanLimitExceeded { limit: 1, .. }));

    // Antes da segunda assinatura começar, só a primeira existia
    assert!(gate.authorize(first.id, hours_ago(18)).await.is_ok());
}

#[tokio::test]
async fn test_cancelling_a_sibling_frees_a_slot() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let first = app.branch(root.id, "Primeira").await;
    let second = app.branch(root.id, "Segunda").await;
    let plan = app.plan(Some(1)).await;
    let gate = &app.state.subscription_service;

    let sub = gate.subscribe(first.id, plan.id, hours_ago(24), None).await.unwrap();
    gate.subscribe(second.id, plan.id, hours_ago(12), None).await.unwrap();
    assert!(gate.authorize(second.id, Utc::now()).await.is_err());

    gate.cancel(sub.id, hours_ago(1)).await.unwrap();

    assert!(gate.authorize(second.id, Utc::now()).await.is_ok());
    assert!(matches!(
        gate.authorize(first.id, Utc::now()).await,
        Err(AppError::NoActiveSubscription { .. })
    ));
}

// =============================================================================
// Cancelamento
// =============================================================================

#[tokio::test]
async fn test_cancel_blocks_later_sales() {
    let app = test_app();
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 5).await;

    let sub = app
        .state
        .subscription_service
        .subscriptions_of(biz.branch.id)
        .await
        .unwrap()
        .remove(0);

    // Aprovação fica em cache aqui
    assert!(app
        .state
        .subscription_service
        .authorize(biz.branch.id, Utc::now())
        .await
        .is_ok());

    let cancel_at = Utc::now();
    let cancelled = app
        .state
        .subscription_service
        .cancel(sub.id, cancel_at)
        .await
        .unwrap();
    assert_eq!(cancelled.ends_at, Some(cancel_at));

    let err = app
        .state
        .sale_service
        .commit_sale(
            biz.branch.id,
            vec![LineItem::new(biz.product.id, 1, price(1000))],
            cancel_at + Duration::seconds(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoActiveSubscription { .. }));
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 5);

    let rejected = app
        .audit
        .events()
        .into_iter()
        .any(|e| matches!(e, AuditEvent::SaleRejected { branch_id, .. } if branch_id == biz.branch.id));
    assert!(rejected);
}

#[tokio::test]
async fn test_cancel_seen_only_inside_the_transaction_aborts_the_sale() {
    let store = MemoryStore::new();
    // Duas instâncias sobre o mesmo banco, cada uma com seu cache
    let front = test_app_over(store.clone());
    let back = test_app_over(store);

    let biz = front.business().await;
    front.restock(biz.branch.id, biz.product.id, 5).await;
    let sub = front
        .state
        .subscription_service
        .subscriptions_of(biz.branch.id)
        .await
        .unwrap()
        .remove(0);

    // Aprovação em aberto fica no cache de `front`
    front
        .state
        .subscription_service
        .authorize(biz.branch.id, Utc::now())
        .await
        .unwrap();

    let cancel_at = Utc::now();
    back.state
        .subscription_service
        .cancel(sub.id, cancel_at)
        .await
        .unwrap();

    let err = front
        .state
        .sale_service
        .commit_sale(
            biz.branch.id,
            vec![LineItem::new(biz.product.id, 1, price(1000))],
            cancel_at + Duration::seconds(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoActiveSubscription { .. }));
    assert_eq!(front.balance(biz.branch.id, biz.product.id).await, 5);

    let events = front.audit.events();
    // A entrada passou pelo cache; quem barrou foi a revalidação
    assert!(events.iter().any(|e| matches!(e, AuditEvent::AuthorizationGranted { branch_id, cached: true, .. } if *branch_id == biz.branch.id)));
    assert!(events.iter().any(|e| matches!(e, AuditEvent::SaleAborted { branch_id, code: "NO_ACTIVE_SUBSCRIPTION", .. } if *branch_id == biz.branch.id)));
    assert!(!events.iter().any(|e| matches!(e, AuditEvent::SaleRejected { .. })));
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_checks_window() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let branch = app.branch(root.id, "Filial").await;
    let plan = app.plan(None).await;
    let gate = &app.state.subscription_service;

    let starts = hours_ago(10);
    let sub = gate.subscribe(branch.id, plan.id, starts, None).await.unwrap();

    let err = gate.cancel(sub.id, starts).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidWindow { .. }));

    let first = gate.cancel(sub.id, hours_ago(5)).await.unwrap();
    let again = gate.cancel(sub.id, hours_ago(1)).await.unwrap();
    assert_eq!(first.ends_at, again.ends_at);

    let err = gate.cancel(uuid::Uuid::new_v4(), Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::SubscriptionNotFound(_)));
}
