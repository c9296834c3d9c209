// src/db/memory.rs

//! Implementação em memória do `Store`, com a mesma disciplina de travas do
//! Postgres: uma trava por (filial, produto), uma por assinatura de filial e
//! uma global para a árvore. Usada pelos testes e por execuções locais sem banco.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{LockMode, Store, StoreTx},
    models::{
        ActiveBranchSubscription, Product, Sale, StockKey, StockMovement, SubscriptionPlan, Tenant,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    Hierarchy,
    Subscription(Uuid),
    Stock(StockKey),
}

enum HeldLock {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

#[derive(Default)]
struct MemoryData {
    tenants: HashMap<Uuid, Tenant>,
    products: HashMap<Uuid, Product>,
    plans: HashMap<Uuid, SubscriptionPlan>,
    subscriptions: HashMap<Uuid, ActiveBranchSubscription>,
    movements: Vec<StockMovement>,
    balances: HashMap<StockKey, i64>,
    sales: HashMap<Uuid, Sale>,
}

#[derive(Default)]
struct Shared {
    data: RwLock<MemoryData>,
    // Só guarda travas em uso; entradas sem dono são removidas na liberação
    locks: Mutex<HashMap<LockKey, Arc<RwLock<()>>>>,
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, HashMap<LockKey, Arc<RwLock<()>>>> {
        // A tabela continua coerente mesmo após pânico de outro dono
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, keys: &[LockKey]) {
        let mut locks = self.lock_table();
        for key in keys {
            if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(key);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            ops: Vec::new(),
            held: HashMap::new(),
        }))
    }
}

// Escritas ficam pendentes até o commit
enum Op {
    InsertTenant(Tenant),
    UpdateParent(Uuid, Uuid),
    PurgeSales(Uuid),
    PurgeStock(Uuid),
    PurgeSubscriptions(Uuid),
    PurgeProducts(Uuid),
    DeleteTenant(Uuid),
    InsertProduct(Product),
    InsertPlan(SubscriptionPlan),
    InsertSubscription(ActiveBranchSubscription),
    UpdateSubscriptionEnd(Uuid, DateTime<Utc>),
    InsertMovement(StockMovement),
    InsertSale(Sale),
}

impl Op {
    fn apply(self, data: &mut MemoryData) {
        match self {
            Op::InsertTenant(t) => {
                data.tenants.insert(t.id, t);
            }
            Op::UpdateParent(id, parent_id) => {
                if let Some(t) = data.tenants.get_mut(&id) {
                    t.parent_tenant_id = Some(parent_id);
                    t.updated_at = Utc::now();
                }
            }
            Op::PurgeSales(tenant_id) => data.sales.retain(|_, s| s.branch_id != tenant_id),
            Op::PurgeStock(tenant_id) => {
                data.movements.retain(|m| m.branch_id != tenant_id);
                data.balances.retain(|k, _| k.branch_id != tenant_id);
            }
            Op::PurgeSubscriptions(tenant_id) => {
                data.subscriptions.retain(|_, s| s.branch_id != tenant_id)
            }
            Op::PurgeProducts(tenant_id) => data.products.retain(|_, p| p.tenant_id != tenant_id),
            Op::DeleteTenant(tenant_id) => {
                data.tenants.remove(&tenant_id);
            }
            Op::InsertProduct(p) => {
                data.products.insert(p.id, p);
            }
            Op::InsertPlan(p) => {
                data.plans.insert(p.id, p);
            }
            Op::InsertSubscription(s) => {
                data.subscriptions.insert(s.id, s);
            }
            Op::UpdateSubscriptionEnd(id, ends_at) => {
                if let Some(s) = data.subscriptions.get_mut(&id) {
                    s.ends_at = Some(ends_at);
                }
            }
            Op::InsertMovement(m) => {
                // O livro-razão já barrou o estouro; aqui só não entra em pânico
                let balance = data.balances.entry(m.key()).or_insert(0);
                *balance = balance.saturating_add(m.delta);
                data.movements.push(m);
            }
            Op::InsertSale(s) => {
                data.sales.insert(s.id, s);
            }
        }
    }
}

pub struct MemoryTx {
    shared: Arc<Shared>,
    ops: Vec<Op>,
    held: HashMap<LockKey, HeldLock>,
}

impl MemoryTx {
    async fn acquire(&mut self, key: LockKey, mode: LockMode) -> Result<(), AppError> {
        if let Some(held) = self.held.get(&key) {
            return match (held, mode) {
                (HeldLock::Shared(_), LockMode::Exclusive) => {
                    Err(AppError::InternalServerError(anyhow::anyhow!(
                        "Promoção de trava não suportada: {key:?}"
                    )))
                }
                _ => Ok(()),
            };
        }

        let lock = {
            let mut locks = self.shared.lock_table();
            Arc::clone(locks.entry(key).or_default())
        };

        let guard = match mode {
            LockMode::Shared => HeldLock::Shared(lock.read_owned().await),
            LockMode::Exclusive => HeldLock::Exclusive(lock.write_owned().await),
        };
        self.held.insert(key, guard);
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        let keys: Vec<LockKey> = self.held.keys().copied().collect();
        self.held.clear();
        self.shared.release(&keys);
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), AppError> {
        self.ops.push(Op::InsertTenant(tenant.clone()));
        Ok(())
    }

    async fn find_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        Ok(self.shared.data.read().await.tenants.get(&tenant_id).cloned())
    }

    async fn find_children(&mut self, parent_id: Uuid) -> Result<Vec<Tenant>, AppError> {
        let data = self.shared.data.read().await;
        let mut children: Vec<Tenant> = data
            .tenants
            .values()
            .filter(|t| t.parent_tenant_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(children)
    }

    async fn update_parent(&mut self, tenant_id: Uuid, parent_id: Uuid) -> Result<(), AppError> {
        self.ops.push(Op::UpdateParent(tenant_id, parent_id));
        Ok(())
    }

    async fn lock_hierarchy(&mut self) -> Result<(), AppError> {
        self.acquire(LockKey::Hierarchy, LockMode::Exclusive).await
    }

    async fn purge_sales(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        let count = self
            .shared
            .data
            .read()
            .await
            .sales
            .values()
            .filter(|s| s.branch_id == tenant_id)
            .count();
        self.ops.push(Op::PurgeSales(tenant_id));
        Ok(count as u64)
    }

    async fn purge_stock(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        let count = self
            .shared
            .data
            .read()
            .await
            .movements
            .iter()
            .filter(|m| m.branch_id == tenant_id)
            .count();
        self.ops.push(Op::PurgeStock(tenant_id));
        Ok(count as u64)
    }

    async fn purge_subscriptions(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        let count = self
            .shared
            .data
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.branch_id == tenant_id)
            .count();
        self.ops.push(Op::PurgeSubscriptions(tenant_id));
        Ok(count as u64)
    }

    async fn purge_products(&mut self, tenant_id: Uuid) -> Result<u64, AppError> {
        let count = self
            .shared
            .data
            .read()
            .await
            .products
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .count();
        self.ops.push(Op::PurgeProducts(tenant_id));
        Ok(count as u64)
    }

    async fn delete_tenant(&mut self, tenant_id: Uuid) -> Result<(), AppError> {
        self.ops.push(Op::DeleteTenant(tenant_id));
        Ok(())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), AppError> {
        self.ops.push(Op::InsertProduct(product.clone()));
        Ok(())
    }

    async fn find_product(&mut self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        Ok(self.shared.data.read().await.products.get(&product_id).cloned())
    }

    async fn insert_plan(&mut self, plan: &SubscriptionPlan) -> Result<(), AppError> {
        self.ops.push(Op::InsertPlan(plan.clone()));
        Ok(())
    }

    async fn find_plan(&mut self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        Ok(self.shared.data.read().await.plans.get(&plan_id).cloned())
    }

    async fn insert_subscription(&mut self, sub: &ActiveBranchSubscription) -> Result<(), AppError> {
        self.ops.push(Op::InsertSubscription(sub.clone()));
        Ok(())
    }

    async fn find_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Option<ActiveBranchSubscription>, AppError> {
        Ok(self
            .shared
            .data
            .read()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn subscriptions_for_branch(
        &mut self,
        branch_id: Uuid,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError> {
        let data = self.shared.data.read().await;
        let mut subs: Vec<ActiveBranchSubscription> = data
            .subscriptions
            .values()
            .filter(|s| s.branch_id == branch_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.starts_at);
        Ok(subs)
    }

    async fn effective_subscriptions_under(
        &mut self,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError> {
        let data = self.shared.data.read().await;
        Ok(data
            .subscriptions
            .values()
            .filter(|s| s.covers(at))
            .filter(|s| {
                data.tenants
                    .get(&s.branch_id)
                    .is_some_and(|t| t.parent_tenant_id == Some(parent_id))
            })
            .cloned()
            .collect())
    }

    async fn update_subscription_end(
        &mut self,
        subscription_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.ops.push(Op::UpdateSubscriptionEnd(subscription_id, ends_at));
        Ok(())
    }

    async fn lock_subscription(&mut self, branch_id: Uuid, mode: LockMode) -> Result<(), AppError> {
        self.acquire(LockKey::Subscription(branch_id), mode).await
    }

    async fn lock_stock(&mut self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, AppError> {
        // Ordem fixa evita deadlock entre lotes que tocam as mesmas chaves
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        for key in &sorted {
            self.acquire(LockKey::Stock(*key), LockMode::Exclusive).await?;
        }

        let data = self.shared.data.read().await;
        Ok(sorted
            .into_iter()
            .map(|key| (key, data.balances.get(&key).copied().unwrap_or(0)))
            .collect())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), AppError> {
        self.ops.push(Op::InsertMovement(movement.clone()));
        Ok(())
    }

    async fn find_movement(&mut self, movement_id: Uuid) -> Result<Option<StockMovement>, AppError> {
        let data = self.shared.data.read().await;
        Ok(data.movements.iter().find(|m| m.id == movement_id).cloned())
    }

    async fn find_reversal(&mut self, movement_id: Uuid) -> Result<Option<StockMovement>, AppError> {
        let data = self.shared.data.read().await;
        Ok(data
            .movements
            .iter()
            .find(|m| m.reverses == Some(movement_id))
            .cloned())
    }

    async fn movements_for(&mut self, key: StockKey) -> Result<Vec<StockMovement>, AppError> {
        let data = self.shared.data.read().await;
        Ok(data
            .movements
            .iter()
            .filter(|m| m.key() == key)
            .cloned()
            .collect())
    }

    async fn sum_deltas(&mut self, key: StockKey) -> Result<i64, AppError> {
        let data = self.shared.data.read().await;
        Ok(data
            .movements
            .iter()
            .filter(|m| m.key() == key)
            .fold(0i64, |acc, m| acc.saturating_add(m.delta)))
    }

    async fn running_balance(&mut self, key: StockKey) -> Result<Option<i64>, AppError> {
        Ok(self.shared.data.read().await.balances.get(&key).copied())
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), AppError> {
        self.ops.push(Op::InsertSale(sale.clone()));
        Ok(())
    }

    async fn find_sale(&mut self, sale_id: Uuid) -> Result<Option<Sale>, AppError> {
        Ok(self.shared.data.read().await.sales.get(&sale_id).cloned())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        let ops = std::mem::take(&mut self.ops);
        {
            let mut data = self.shared.data.write().await;
            for op in ops {
                op.apply(&mut data);
            }
        }
        // As travas só caem (no Drop) depois que as escritas ficaram visíveis
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MovementEntry, MovementKind, NewTenant};
    use std::time::Duration;

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let tenant = Tenant::new_root(NewTenant::named("Padaria")).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_tenant(&tenant).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_tenant(tenant.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_updates_running_balance() {
        let store = MemoryStore::new();
        let key = StockKey::new(Uuid::new_v4(), Uuid::new_v4());
        let movement = StockMovement::new(MovementEntry::new(
            key.branch_id,
            key.product_id,
            12,
            MovementKind::Restock,
            Uuid::new_v4(),
        ))
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_stock(&[key]).await.unwrap();
        tx.insert_movement(&movement).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.running_balance(key).await.unwrap(), Some(12));
        assert_eq!(tx.sum_deltas(key).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn stock_lock_blocks_second_transaction_until_commit() {
        let store = MemoryStore::new();
        let key = StockKey::new(Uuid::new_v4(), Uuid::new_v4());

        let mut first = store.begin().await.unwrap();
        first.lock_stock(&[key]).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.lock_stock(&[key]).await.unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        first.commit().await.unwrap();
        let balances = contender.await.unwrap();
        assert_eq!(balances.get(&key), Some(&0));
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let store = MemoryStore::new();
        let branch = Uuid::new_v4();
        let a = StockKey::new(branch, Uuid::new_v4());
        let b = StockKey::new(branch, Uuid::new_v4());

        let mut first = store.begin().await.unwrap();
        first.lock_stock(&[a]).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let locked = tokio::time::timeout(Duration::from_millis(200), second.lock_stock(&[b])).await;
        assert!(locked.is_ok());
    }

    fn tracked_locks(store: &MemoryStore) -> usize {
        store.shared.lock_table().len()
    }

    #[tokio::test]
    async fn lock_table_is_pruned_after_commit_and_drop() {
        let store = MemoryStore::new();
        let branch = Uuid::new_v4();
        let keys: Vec<StockKey> = (0..5).map(|_| StockKey::new(branch, Uuid::new_v4())).collect();

        let mut tx = store.begin().await.unwrap();
        tx.lock_stock(&keys).await.unwrap();
        tx.lock_subscription(branch, LockMode::Shared).await.unwrap();
        assert_eq!(tracked_locks(&store), 6);
        tx.commit().await.unwrap();
        assert_eq!(tracked_locks(&store), 0);

        let mut tx = store.begin().await.unwrap();
        tx.lock_hierarchy().await.unwrap();
        tx.lock_stock(&keys).await.unwrap();
        drop(tx);
        assert_eq!(tracked_locks(&store), 0);
    }

    #[tokio::test]
    async fn contended_lock_is_pruned_once_both_leave() {
        let store = MemoryStore::new();
        let key = StockKey::new(Uuid::new_v4(), Uuid::new_v4());

        let mut first = store.begin().await.unwrap();
        first.lock_stock(&[key]).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.lock_stock(&[key]).await.unwrap();
                tx.commit().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // O primeiro sai, mas o concorrente ainda usa a mesma trava
        first.commit().await.unwrap();
        contender.await.unwrap();
        assert_eq!(tracked_locks(&store), 0);
    }
}
