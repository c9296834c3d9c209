// src/db/store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        ActiveBranchSubscription, Product, Sale, StockKey, StockMovement, SubscriptionPlan, Tenant,
    },
};

/// Modo de trava sobre as assinaturas de uma filial.
/// Vendas pegam `Shared` (revalidação do Gate); mudanças de assinatura pegam `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Fábrica de transações. Cada operação de escrita do núcleo roda inteira
/// dentro de um único `StoreTx`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

/// Uma transação (unidade de trabalho). Descartar sem `commit` desfaz tudo.
///
/// Leituras enxergam o estado já confirmado; as escritas da própria
/// transação só aparecem depois do `commit`.
#[async_trait]
pub trait StoreTx: Send {
    // --- Tenants ---
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError>;
    async fn find_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;
    async fn find_children(&mut self, parent_id: Uuid) -> Result<Vec<Tenant>, AppError>;
    async fn update_parent(&mut self, tenant_id: Uuid, parent_id: Uuid) -> Result<(), AppError>;
    /// Trava global da árvore (criação, movimentação e remoção de tenants).
    async fn lock_hierarchy(&mut self) -> Result<(), AppError>;

    // --- Remoção em cascata (só o TenantService chama, na ordem de dependência) ---
    async fn purge_sales(&mut self, tenant_id: Uuid) -> Result<u64, AppError>;
    async fn purge_stock(&mut self, tenant_id: Uuid) -> Result<u64, AppError>;
    async fn purge_subscriptions(&mut self, tenant_id: Uuid) -> Result<u64, AppError>;
    async fn purge_products(&mut self, tenant_id: Uuid) -> Result<u64, AppError>;
    async fn delete_tenant(&mut self, tenant_id: Uuid) -> Result<(), AppError>;

    // --- Produtos ---
    async fn insert_product(&mut self, product: &Product) -> Result<(), AppError>;
    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, AppError>;

    // --- Planos e assinaturas ---
    async fn insert_plan(&mut self, plan: &SubscriptionPlan) -> Result<(), AppError>;
    async fn find_plan(&mut self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError>;
    async fn insert_subscription(&mut self, sub: &ActiveBranchSubscription) -> Result<(), AppError>;
    async fn find_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Option<ActiveBranchSubscription>, AppError>;
    async fn subscriptions_for_branch(
        &mut self,
        branch_id: Uuid,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError>;
    /// Assinaturas vigentes em `at` de todas as filiais filhas de `parent_id`.
    async fn effective_subscriptions_under(
        &mut self,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError>;
    async fn update_subscription_end(
        &mut self,
        subscription_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
    async fn lock_subscription(&mut self, branch_id: Uuid, mode: LockMode) -> Result<(), AppError>;

    // --- Livro-razão ---
    /// Trava as chaves (em ordem) e devolve o saldo corrente de cada uma.
    async fn lock_stock(&mut self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, AppError>;
    /// Acrescenta a movimentação e atualiza o saldo corrente da chave.
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), AppError>;
    async fn find_movement(&mut self, movement_id: Uuid) -> Result<Option<StockMovement>, AppError>;
    async fn find_reversal(&mut self, movement_id: Uuid) -> Result<Option<StockMovement>, AppError>;
    async fn movements_for(&mut self, key: StockKey) -> Result<Vec<StockMovement>, AppError>;
    async fn sum_deltas(&mut self, key: StockKey) -> Result<i64, AppError>;
    async fn running_balance(&mut self, key: StockKey) -> Result<Option<i64>, AppError>;

    // --- Vendas ---
    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), AppError>;
    async fn find_sale(&mut self, sale_id: Uuid) -> Result<Option<Sale>, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
