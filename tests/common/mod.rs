//! Utilitários compartilhados pelos testes de integração: store em memória,
//! um sink que guarda os eventos de auditoria e atalhos para montar a árvore.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use branch_ledger::{
    config::{AppConfig, AppState},
    db::MemoryStore,
    models::{NewPlan, NewProduct, NewTenant, Product, SubscriptionPlan, Tenant},
    services::{AuditEvent, AuditSink, LogReceiptStore},
};

/// Sink que guarda os eventos em memória para as asserções.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct TestApp {
    pub state: AppState,
    pub audit: Arc<RecordingAuditSink>,
}

/// Uma matriz, uma filial e uma assinatura vigente "agora".
pub struct Business {
    pub root: Tenant,
    pub branch: Tenant,
    pub plan: SubscriptionPlan,
    pub product: Product,
}

pub fn test_app() -> TestApp {
    test_app_over(MemoryStore::new())
}

/// Estado novo (caches próprios) sobre um store que pode ser compartilhado.
pub fn test_app_over(store: MemoryStore) -> TestApp {
    let config = AppConfig {
        // Retentativas rápidas encurtam os testes de concorrência
        commit_retry_base: std::time::Duration::from_millis(1),
        ..AppConfig::default()
    };
    let audit = Arc::new(RecordingAuditSink::default());
    let state = AppState::build(
        &config,
        Arc::new(store),
        audit.clone(),
        Arc::new(LogReceiptStore),
    );
    TestApp { state, audit }
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

pub fn price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

impl TestApp {
    pub async fn root(&self, name: &str) -> Tenant {
        self.state
            .tenant_service
            .create_root(NewTenant::named(name))
            .await
            .unwrap()
    }

    pub async fn branch(&self, parent_id: Uuid, name: &str) -> Tenant {
        self.state
            .tenant_service
            .create_child(parent_id, NewTenant::named(name))
            .await
            .unwrap()
    }

    pub async fn plan(&self, max_active_branches: Option<i32>) -> SubscriptionPlan {
        self.state
            .subscription_service
            .create_plan(NewPlan {
                name: "Plano Teste".into(),
                max_active_branches,
                duration_days: None,
            })
            .await
            .unwrap()
    }

    pub async fn product(&self, tenant_id: Uuid, sku: &str, is_service: bool) -> Product {
        self.state
            .product_service
            .create_product(
                tenant_id,
                NewProduct {
                    sku: sku.into(),
                    name: format!("Produto {sku}"),
                    is_service,
                    base_cost: price(500),
                    sale_price: Some(price(1000)),
                },
            )
            .await
            .unwrap()
    }

    /// Assinatura iniciada há um dia, sem fim.
    pub async fn subscribe(&self, branch_id: Uuid, plan_id: Uuid) {
        self.state
            .subscription_service
            .subscribe(branch_id, plan_id, hours_ago(24), None)
            .await
            .unwrap();
    }

    pub async fn restock(&self, branch_id: Uuid, product_id: Uuid, quantity: i64) {
        self.state
            .sale_service
            .commit_stock_change(
                branch_id,
                vec![branch_ledger::services::StockLine {
                    product_id,
                    delta: quantity,
                }],
                branch_ledger::services::StockChangeKind::Restock,
                Utc::now(),
                None,
            )
            .await
            .unwrap();
    }

    /// Matriz + filial assinante + um produto da matriz.
    pub async fn business(&self) -> Business {
        let root = self.root("Matriz").await;
        let branch = self.branch(root.id, "Filial Centro").await;
        let plan = self.plan(None).await;
        self.subscribe(branch.id, plan.id).await;
        let product = self.product(root.id, "SKU-1", false).await;
        Business {
            root,
            branch,
            plan,
            product,
        }
    }

    pub async fn balance(&self, branch_id: Uuid, product_id: Uuid) -> i64 {
        self.state
            .ledger_service
            .current_balance(branch_id, product_id)
            .await
            .unwrap()
    }
}
