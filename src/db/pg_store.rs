// src/db/pg_store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{
        store::{LockMode, Store, StoreTx},
        InventoryRepository, SalesRepository, SubscriptionRepository, TenantRepository,
    },
    models::{
        ActiveBranchSubscription, Product, Sale, StockKey, StockMovement, SubscriptionPlan, Tenant,
    },
};

/// `Store` sobre Postgres: cada `StoreTx` é uma transação sqlx.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            tenants: TenantRepository::new(),
            inventory: InventoryRepository::new(),
            subscriptions: SubscriptionRepository::new(),
            sales: SalesRepository::new(),
        }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    tenants: TenantRepository,
    inventory: InventoryRepository,
    subscriptions: SubscriptionRepository,
    sales: SalesRepository,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError> {
        self.tenants.insert(&mut *self.tx, tenant).await
    }

    async fn find_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        self.tenants.find_by_id(&mut *self.tx, tenant_id).await
    }

    async fn find_children(&mut self, parent_id: Uuid) -> Result<Vec<Tenant>, AppError> {
        self.tenants.find_children(&mut *self.tx, parent_id).await
    }

    async fn update_parent(&mut self, tenant_id: Uuid, parent_id: Uuid) -> Result<(), AppError> {
        self.tenants.update_parent(&mut *self.tx, tenant_id, parent_id).await
    }

    async fn lock_hierarchy(&mut self) -> Result<(), AppError> {
        self.tenants.lock_hierarchy(&mut *self.tx).await
    }

    async fn purge_sales(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        self.sales.purge_sales(&mut *self.tx, tenant_id).await
    }

    async fn purge_stock(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        self.inventory.purge_stock(&mut *self.tx, tenant_id).await
    }

    async fn purge_subscriptions(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        self.subscriptions.purge(&mut *self.tx, tenant_id).await
    }

    async fn purge_products(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        self.inventory.purge_products(&mut *self.tx, tenant_id).await
    }

    async fn delete_tenant(&mut self, tenant_id: Uuid) -> Result<(), AppError> {
        self.tenants.delete(&mut *self.tx, tenant_id).await
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), AppError> {
        self.inventory.insert_product(&mut *self.tx, product).await
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        self.inventory.find_product(&mut *self.tx, product_id).await
    }

    async fn insert_plan(&mut self, plan: &SubscriptionPlan) -> Result<(), AppError> {
        self.subscriptions.insert_plan(&mut *self.tx, plan).await
    }

    async fn find_plan(&mut self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        self.subscriptions.find_plan(&mut *self.tx, plan_id).await
    }

    async fn insert_subscription(&mut self, sub: &ActiveBranchSubscription) -> Result<(), AppError> {
        self.subscriptions.insert_subscription(&mut *self.tx, sub).await
    }

    async fn find_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Option<ActiveBranchSubscription>, AppError> {
        self.subscriptions
            .find_subscription(&mut *self.tx, subscription_id)
            .await
    }

    async fn subscriptions_for_branch(
        &mut self,
        branch_id: Uuid,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError> {
        self.subscriptions.for_branch(&mut *self.tx, branch_id).await
    }

    async fn effective_subscriptions_under(
        &mut self,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError> {
        self.subscriptions
            .effective_under(&mut *self.tx, parent_id, at)
            .await
    }

    async fn update_subscription_end(
        &mut self,
        subscription_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.subscriptions
            .update_end(&mut *self.tx, subscription_id, ends_at)
            .await
    }

    async fn lock_subscription(&mut self, branch_id: Uuid, mode: LockMode) -> Result<(), AppError> {
        self.subscriptions
            .lock_branch(&mut *self.tx, branch_id, mode)
            .await
    }

    async fn lock_stock(&mut self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, AppError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut balances = HashMap::with_capacity(sorted.len());
        for key in sorted {
            let quantity = self.inventory.lock_balance(&mut *self.tx, key).await?;
            balances.insert(key, quantity);
        }
        Ok(balances)
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), AppError> {
        self.inventory.insert_movement(&mut *self.tx, movement).await
    }

    async fn find_movement(&mut self, movement_id: Uuid) -> Result<Option<StockMovement>, AppError> {
        self.inventory.find_movement(&mut *self.tx, movement_id).await
    }

    async fn find_reversal(&mut self, movement_id: Uuid) -> Result<Option<StockMovement>, AppError> {
        self.inventory.find_reversal(&mut *self.tx, movement_id).await
    }

    async fn movements_for(&mut self, key: StockKey) -> Result<Vec<StockMovement>, AppError> {
        self.inventory.movements_for(&mut *self.tx, key).await
    }

    async fn sum_deltas(&mut self, key: StockKey) -> Result<i64, AppError> {
        self.inventory.sum_deltas(&mut *self.tx, key).await
    }

    async fn running_balance(&mut self, key: StockKey) -> Result<Option<i64>, AppError> {
        self.inventory.running_balance(&mut *self.tx, key).await
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), AppError> {
        self.sales.insert_sale(&mut *self.tx, sale).await
    }

    async fn find_sale(&mut self, sale_id: Uuid) -> Result<Option<Sale>, AppError> {
        self.sales.find_sale(&mut *self.tx, sale_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let PgTx { tx, .. } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        let PgTx { tx, .. } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
