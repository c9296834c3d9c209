//! Testes de integração da árvore de tenants: criação, troca de pai, escopo
//! e exclusão em cascata.

mod common;

use branch_ledger::{services::AuditEvent, AppError};
use common::{price, test_app};
use branch_ledger::models::LineItem;
use chrono::Utc;

// =============================================================================
// Forma da árvore
// =============================================================================

#[tokio::test]
async fn test_ancestors_are_ordered_root_first() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let region = app.branch(root.id, "Regional Sul").await;
    let store = app.branch(region.id, "Loja 12").await;

    let ancestors = app.state.tenant_service.ancestors_of(store.id).await.unwrap();
    let ids: Vec<_> = ancestors.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![root.id, region.id]);

    let top = app.state.tenant_service.root_of(store.id).await.unwrap();
    assert_eq!(top.id, root.id);
    assert!(top.is_root());
}

#[tokio::test]
async fn test_descendants_cover_the_whole_subtree() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let a = app.branch(root.id, "A").await;
    let b = app.branch(root.id, "B").await;
    let a1 = app.branch(a.id, "A1").await;

    let mut ids: Vec<_> = app
        .state
        .tenant_service
        .descendants_of(root.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    ids.sort();
    let mut expected = vec![a.id, b.id, a1.id];
    expected.sort();
    assert_eq!(ids, expected);

    let leaf = app.state.tenant_service.descendants_of(a1.id).await.unwrap();
    assert!(leaf.is_empty());
}

#[tokio::test]
async fn test_reparent_rejects_cycles() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let a = app.branch(root.id, "A").await;
    let a1 = app.branch(a.id, "A1").await;

    // Pai de si mesmo
    let err = app.state.tenant_service.reparent(a.id, a.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidHierarchy { .. }));

    // Debaixo de um descendente
    let err = app.state.tenant_service.reparent(a.id, a1.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidHierarchy { .. }));

    // A árvore continua intacta
    let chain = app.state.tenant_service.ancestors_of(a1.id).await.unwrap();
    assert_eq!(chain.len(), 2);
}

#[tokio::test]
async fn test_reparent_moves_subtree() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let a = app.branch(root.id, "A").await;
    let b = app.branch(root.id, "B").await;
    let a1 = app.branch(a.id, "A1").await;

    let moved = app.state.tenant_service.reparent(a1.id, b.id).await.unwrap();
    assert_eq!(moved.parent_tenant_id, Some(b.id));

    let ids: Vec<_> = app
        .state
        .tenant_service
        .ancestors_of(a1.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![root.id, b.id]);
}

#[tokio::test]
async fn test_reparent_to_missing_parent_fails() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let a = app.branch(root.id, "A").await;

    let err = app
        .state
        .tenant_service
        .reparent(a.id, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidHierarchy { .. }));
}

// =============================================================================
// Escopo
// =============================================================================

#[tokio::test]
async fn test_scope_allows_self_and_descendants_only() {
    let app = test_app();
    let root = app.root("Matriz").await;
    let a = app.branch(root.id, "A").await;
    let b = app.branch(root.id, "B").await;
    let svc = &app.state.tenant_service;

    assert!(svc.ensure_in_scope(root.id, root.id).await.is_ok());
    assert!(svc.ensure_in_scope(root.id, a.id).await.is_ok());

    let err = svc.ensure_in_scope(a.id, b.id).await.unwrap_err();
    assert!(matches!(err, AppError::OutOfScope { .. }));
    let err = svc.ensure_in_scope(a.id, root.id).await.unwrap_err();
    assert!(matches!(err, AppError::OutOfScope { .. }));

    let other = app.root("Outro negócio").await;
    assert!(svc.ensure_in_scope(other.id, a.id).await.is_err());
}

// =============================================================================
// Exclusão em cascata
// =============================================================================

#[tokio::test]
async fn test_delete_removes_subtree_and_its_data() {
    let app = test_app();
    let biz = app.business().await;
    let child = app.branch(biz.branch.id, "Quiosque").await;
    let local_product = app.product(biz.branch.id, "LOCAL-1", false).await;

    app.restock(biz.branch.id, biz.product.id, 10).await;
    app.restock(biz.branch.id, local_product.id, 4).await;
    let sale = app
        .state
        .sale_service
        .commit_sale(
            biz.branch.id,
            vec![LineItem::new(biz.product.id, 2, price(1000))],
            Utc::now(),
        )
        .await
        .unwrap();

    let report = app.state.tenant_service.delete(biz.branch.id).await.unwrap();

    assert_eq!(report.removed_tenants.len(), 2);
    // Filhos antes dos pais
    assert_eq!(report.removed_tenants, vec![child.id, biz.branch.id]);
    assert_eq!(report.removed_sales, 1);
    assert_eq!(report.removed_movements, 3);
    assert_eq!(report.removed_subscriptions, 1);
    assert_eq!(report.removed_products, 1);

    let svc = &app.state.tenant_service;
    assert!(matches!(svc.find(biz.branch.id).await, Err(AppError::TenantNotFound(_))));
    assert!(matches!(svc.find(child.id).await, Err(AppError::TenantNotFound(_))));
    assert!(svc.find(biz.root.id).await.is_ok());

    assert!(matches!(
        app.state.sale_service.find_sale(sale.id).await,
        Err(AppError::SaleNotFound(_))
    ));
    let movements = app
        .state
        .ledger_service
        .movements_of(biz.branch.id, biz.product.id)
        .await
        .unwrap();
    assert!(movements.is_empty());
    assert!(app.state.product_service.find(local_product.id).await.is_err());
    // O produto da matriz sobrevive
    assert!(app.state.product_service.find(biz.product.id).await.is_ok());

    let deleted = app
        .audit
        .events()
        .into_iter()
        .any(|e| matches!(e, AuditEvent::TenantDeleted { tenant_id, removed_tenants: 2 } if tenant_id == biz.branch.id));
    assert!(deleted);
}

#[tokio::test]
async fn test_delete_missing_tenant_is_not_found() {
    let app = test_app();
    let err = app
        .state
        .tenant_service
        .delete(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TenantNotFound(_)));
}

#[tokio::test]
async fn test_delete_evicts_cached_balances_and_approvals() {
    let app = test_app();
    let biz = app.business().await;
    app.restock(biz.branch.id, biz.product.id, 8).await;

    // Aquece os dois caches
    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 8);
    app.state
        .subscription_service
        .authorize(biz.branch.id, Utc::now())
        .await
        .unwrap();

    app.state.tenant_service.delete(biz.branch.id).await.unwrap();

    assert_eq!(app.balance(biz.branch.id, biz.product.id).await, 0);
    let err = app
        .state
        .subscription_service
        .authorize(biz.branch.id, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TenantNotFound(id) if id == biz.branch.id));

    let err = app
        .state
        .sale_service
        .commit_sale(
            biz.branch.id,
            vec![LineItem::new(biz.product.id, 1, price(1000))],
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TenantNotFound(_)));
}
