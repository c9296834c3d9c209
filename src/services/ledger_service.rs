// src/services/ledger_service.rs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    common::error::{AppError, StockShortage},
    db::{Store, StoreTx},
    models::inventory::{MovementEntry, MovementKind, Product, StockKey, StockMovement},
    services::tenancy_service::{ancestors_in, descendants_in, TenantRemovalHook},
};

const BALANCE_CACHE_CAPACITY: u64 = 50_000;

/// Saldo de um produto somado sobre um tenant e todas as filiais abaixo dele.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBalance {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub total: i64,
    pub branches: Vec<BranchBalance>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchBalance {
    pub branch_id: Uuid,
    pub quantity: i64,
}

/// Saldo corrente (linha de saldo) contra a soma do livro-razão.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub running_balance: i64,
    pub ledger_balance: i64,
    pub consistent: bool,
}

/// Livro-razão de estoque: só acrescenta movimentações; o saldo é a soma delas.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn Store>,
    balances: Cache<StockKey, i64>,
    // Sobe a cada escrita confirmada; leitura que cruzou uma escrita não fica no cache
    epoch: Arc<AtomicU64>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>, cache_ttl: Duration) -> Self {
        let balances = Cache::builder()
            .max_capacity(BALANCE_CACHE_CAPACITY)
            .time_to_live(cache_ttl)
            .build();
        Self {
            store,
            balances,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    // ---
    // Leituras
    // ---

    /// Saldo atual (0 quando não há movimentações).
    pub async fn current_balance(&self, branch_id: Uuid, product_id: Uuid) -> Result<i64, AppError> {
        let key = StockKey::new(branch_id, product_id);
        if let Some(quantity) = self.balances.get(&key).await {
            return Ok(quantity);
        }

        let seen = self.epoch.load(Ordering::SeqCst);
        let mut tx = self.store.begin().await?;
        let quantity = tx.running_balance(key).await?.unwrap_or(0);
        self.remember(key, quantity, seen).await;
        Ok(quantity)
    }

    /// Guarda o saldo lido; se alguma escrita confirmou no meio da leitura, descarta.
    async fn remember(&self, key: StockKey, quantity: i64, seen: u64) {
        self.balances.insert(key, quantity).await;
        if self.epoch.load(Ordering::SeqCst) != seen {
            self.balances.invalidate(&key).await;
        }
    }

    pub async fn movements_of(&self, branch_id: Uuid, product_id: Uuid) -> Result<Vec<StockMovement>, AppError> {
        let mut tx = self.store.begin().await?;
        tx.movements_for(StockKey::new(branch_id, product_id)).await
    }

    pub async fn find_movement(&self, movement_id: Uuid) -> Result<StockMovement, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_movement(movement_id)
            .await?
            .ok_or(AppError::MovementNotFound(movement_id))
    }

    /// Soma o saldo do produto no tenant e em todos os descendentes.
    pub async fn balance_under(&self, tenant_id: Uuid, product_id: Uuid) -> Result<AggregateBalance, AppError> {
        let mut tx = self.store.begin().await?;
        if tx.find_tenant(tenant_id).await?.is_none() {
            return Err(AppError::TenantNotFound(tenant_id));
        }

        let mut branch_ids = vec![tenant_id];
        branch_ids.extend(descendants_in(&mut *tx, tenant_id).await?.into_iter().map(|t| t.id));

        let mut branches = Vec::with_capacity(branch_ids.len());
        for branch_id in branch_ids {
            let quantity = tx
                .running_balance(StockKey::new(branch_id, product_id))
                .await?
                .unwrap_or(0);
            branches.push(BranchBalance { branch_id, quantity });
        }

        Ok(AggregateBalance {
            tenant_id,
            product_id,
            total: branches.iter().map(|b| b.quantity).sum(),
            branches,
        })
    }

    /// Compara o saldo corrente com a soma dos deltas. Divergência só gera aviso.
    pub async fn reconcile(&self, branch_id: Uuid, product_id: Uuid) -> Result<Reconciliation, AppError> {
        let key = StockKey::new(branch_id, product_id);
        let mut tx = self.store.begin().await?;
        let running_balance = tx.running_balance(key).await?.unwrap_or(0);
        let ledger_balance = tx.sum_deltas(key).await?;

        let consistent = running_balance == ledger_balance;
        if !consistent {
            tracing::warn!(
                branch_id = %branch_id,
                product_id = %product_id,
                running_balance,
                ledger_balance,
                "Saldo corrente divergente do livro-razão"
            );
        }

        Ok(Reconciliation {
            branch_id,
            product_id,
            running_balance,
            ledger_balance,
            consistent,
        })
    }

    // ---
    // Escritas
    // ---

    pub async fn append_movement(
        &self,
        branch_id: Uuid,
        product_id: Uuid,
        delta: i64,
        kind: MovementKind,
        txn_ref: Uuid,
    ) -> Result<StockMovement, AppError> {
        let entry = MovementEntry::new(branch_id, product_id, delta, kind, txn_ref);
        let mut movements = self.append_batch(vec![entry]).await?;
        movements
            .pop()
            .ok_or_else(|| AppError::InternalServerError(anyhow::anyhow!("Lote vazio após gravação")))
    }

    /// Tudo ou nada: uma entrada inválida descarta o lote inteiro.
    pub async fn append_batch(&self, entries: Vec<MovementEntry>) -> Result<Vec<StockMovement>, AppError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.store.begin().await?;
        let movements = self.append_in(&mut *tx, &entries).await?;
        tx.commit().await?;

        let keys: Vec<StockKey> = movements.iter().map(StockMovement::key).collect();
        self.forget(&keys).await;
        Ok(movements)
    }

    /// Estorna uma movimentação com um ajuste de sinal oposto.
    pub async fn reverse_movement(&self, movement_id: Uuid, txn_ref: Uuid) -> Result<StockMovement, AppError> {
        let mut tx = self.store.begin().await?;
        let reversal = self.reverse_in(&mut *tx, movement_id, txn_ref).await?;
        tx.commit().await?;

        self.forget(&[reversal.key()]).await;
        Ok(reversal)
    }

    /// Tira do cache os saldos que acabaram de mudar. Chamar depois do commit.
    pub(crate) async fn forget(&self, keys: &[StockKey]) {
        // Primeiro a época, depois a remoção: leitores em voo percebem a troca
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for key in keys {
            self.balances.invalidate(key).await;
        }
    }

    pub fn invalidate_cache(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.balances.invalidate_all();
    }

    /// Núcleo do livro-razão, dentro da transação de quem chama. Valida as
    /// entradas, trava as chaves em ordem e grava as movimentações. Em
    /// `InsufficientStock`, `line` é a posição da entrada em `entries`.
    pub(crate) async fn append_in(
        &self,
        tx: &mut dyn StoreTx,
        entries: &[MovementEntry],
    ) -> Result<Vec<StockMovement>, AppError> {
        // 1. Sinal compatível com o tipo
        let movements = entries
            .iter()
            .cloned()
            .map(StockMovement::new)
            .collect::<Result<Vec<_>, _>>()?;

        // 2. Produto existe, é físico e pertence à filial ou a um ancestral
        let mut owners: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for (line, movement) in movements.iter().enumerate() {
            let product =
                resolve_product(tx, &mut owners, movement.branch_id, movement.product_id, line).await?;
            if product.is_service {
                return Err(AppError::InvalidProduct {
                    branch_id: movement.branch_id,
                    product_id: movement.product_id,
                    line: Some(line),
                    reason: "serviços não têm estoque".into(),
                });
            }
        }

        // 3. Trava as chaves (ordenadas) e simula os saldos resultantes
        let keys: Vec<StockKey> = movements.iter().map(StockMovement::key).collect();
        let mut balances = tx.lock_stock(&keys).await?;

        let mut shortages = Vec::new();
        for (line, movement) in movements.iter().enumerate() {
            let key = movement.key();
            let available = balances.get(&key).copied().unwrap_or(0);
            let Some(after) = available.checked_add(movement.delta) else {
                return Err(AppError::InvalidQuantity {
                    product_id: movement.product_id,
                    quantity: movement.delta,
                    reason: format!(
                        "linha {line}: o saldo resultante (filial {}) sai do intervalo suportado",
                        movement.branch_id
                    ),
                });
            };

            if movement.delta < 0 && after < 0 && !movement.kind.allows_negative_balance() {
                // Entrada recusada não consome saldo das seguintes
                shortages.push(StockShortage {
                    line,
                    branch_id: movement.branch_id,
                    product_id: movement.product_id,
                    available,
                    requested: -movement.delta,
                });
                continue;
            }
            balances.insert(key, after);
        }

        if !shortages.is_empty() {
            return Err(AppError::InsufficientStock { shortages });
        }

        // 4. Grava (o saldo corrente acompanha cada movimentação)
        for movement in &movements {
            tx.insert_movement(movement).await?;
        }

        for movement in &movements {
            if movement.kind == MovementKind::Override {
                if let Some(balance) = balances.get(&movement.key()).filter(|b| **b < 0) {
                    tracing::warn!(
                        branch_id = %movement.branch_id,
                        product_id = %movement.product_id,
                        balance,
                        "Saldo negativo autorizado por override"
                    );
                }
            }
        }

        Ok(movements)
    }

    pub(crate) async fn reverse_in(
        &self,
        tx: &mut dyn StoreTx,
        movement_id: Uuid,
        txn_ref: Uuid,
    ) -> Result<StockMovement, AppError> {
        let original = tx
            .find_movement(movement_id)
            .await?
            .ok_or(AppError::MovementNotFound(movement_id))?;

        // Trava antes de procurar estorno: dois estornos simultâneos se enfileiram aqui
        tx.lock_stock(&[original.key()]).await?;
        if let Some(existing) = tx.find_reversal(movement_id).await? {
            return Err(AppError::AlreadyReversed {
                movement_id,
                reversal_id: existing.id,
            });
        }

        let mut entry = MovementEntry::new(
            original.branch_id,
            original.product_id,
            -original.delta,
            MovementKind::Adjustment,
            txn_ref,
        )
        .with_notes(Some(format!("Estorno de {movement_id}")));
        entry.reverses = Some(movement_id);

        let mut movements = self.append_in(tx, &[entry]).await?;
        let reversal = movements
            .pop()
            .ok_or_else(|| AppError::InternalServerError(anyhow::anyhow!("Estorno não gravado")))?;

        tracing::info!(movement_id = %movement_id, reversal_id = %reversal.id, "Movimentação estornada");
        Ok(reversal)
    }
}

/// Busca o produto e confere se a filial pode usá-lo (dono é ela ou um ancestral).
pub(crate) async fn resolve_product(
    tx: &mut dyn StoreTx,
    owners: &mut HashMap<Uuid, HashSet<Uuid>>,
    branch_id: Uuid,
    product_id: Uuid,
    line: usize,
) -> Result<Product, AppError> {
    let product = tx
        .find_product(product_id)
        .await?
        .ok_or_else(|| AppError::InvalidProduct {
            branch_id,
            product_id,
            line: Some(line),
            reason: "o produto não existe".into(),
        })?;

    if !owners.contains_key(&branch_id) {
        let mut allowed: HashSet<Uuid> = ancestors_in(tx, branch_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        allowed.insert(branch_id);
        owners.insert(branch_id, allowed);
    }

    let usable = owners
        .get(&branch_id)
        .is_some_and(|allowed| allowed.contains(&product.tenant_id));
    if !usable {
        return Err(AppError::InvalidProduct {
            branch_id,
            product_id,
            line: Some(line),
            reason: format!("o produto pertence ao tenant {}, fora da linhagem da filial", product.tenant_id),
        });
    }

    Ok(product)
}

impl TenantRemovalHook for LedgerService {
    fn tenants_removed(&self, _tenant_ids: &[Uuid]) {
        self.invalidate_cache();
    }
}
