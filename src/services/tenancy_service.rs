// src/services/tenancy_service.rs

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{LockMode, Store, StoreTx},
    models::tenancy::{NewTenant, Tenant},
    services::events::{AuditEvent, AuditSink},
};

/// Limite de passos em qualquer caminhada pela árvore. Passar disso é tratado
/// como árvore corrompida, nunca como laço infinito.
pub const MAX_HIERARCHY_DEPTH: usize = 64;

/// Resultado de uma remoção em cascata.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub tenant_id: Uuid,
    // Do mais profundo para o mais raso; o próprio tenant é o último
    pub removed_tenants: Vec<Uuid>,
    pub removed_sales: u64,
    pub removed_movements: u64,
    pub removed_subscriptions: u64,
    pub removed_products: u64,
}

/// Avisado depois que uma remoção em cascata confirma, com todos os ids removidos.
pub trait TenantRemovalHook: Send + Sync {
    fn tenants_removed(&self, tenant_ids: &[Uuid]);
}

#[derive(Clone)]
pub struct TenantService {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    removal_hooks: Vec<Arc<dyn TenantRemovalHook>>,
}

impl TenantService {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            removal_hooks: Vec::new(),
        }
    }

    pub fn with_removal_hook(mut self, hook: Arc<dyn TenantRemovalHook>) -> Self {
        self.removal_hooks.push(hook);
        self
    }

    pub async fn create_root(&self, attrs: NewTenant) -> Result<Tenant, AppError> {
        let tenant = Tenant::new_root(attrs)?;

        let mut tx = self.store.begin().await?;
        tx.insert_tenant(&tenant).await?;
        tx.commit().await?;

        tracing::info!(tenant_id = %tenant.id, "Tenant raiz criado: {}", tenant.name);
        Ok(tenant)
    }

    /// Cria uma filial sob `parent_id`.
    pub async fn create_child(&self, parent_id: Uuid, attrs: NewTenant) -> Result<Tenant, AppError> {
        let branch = Tenant::new_branch(parent_id, attrs)?;

        let mut tx = self.store.begin().await?;
        tx.lock_hierarchy().await?;

        // 1. O pai precisa existir
        if tx.find_tenant(parent_id).await?.is_none() {
            return Err(AppError::InvalidHierarchy {
                tenant_id: branch.id,
                reason: format!("o tenant pai {parent_id} não existe"),
            });
        }

        // 2. A cadeia acima do pai precisa ser finita e não pode conter a nova filial
        let chain = ancestors_in(&mut *tx, parent_id).await?;
        if chain.iter().any(|t| t.id == branch.id) {
            return Err(AppError::InvalidHierarchy {
                tenant_id: branch.id,
                reason: "o vínculo criaria um ciclo".into(),
            });
        }

        tx.insert_tenant(&branch).await?;
        tx.commit().await?;

        tracing::info!(tenant_id = %branch.id, parent_id = %parent_id, "Filial criada: {}", branch.name);
        Ok(branch)
    }

    /// Move um tenant para debaixo de outro pai.
    pub async fn reparent(&self, tenant_id: Uuid, new_parent_id: Uuid) -> Result<Tenant, AppError> {
        let mut tx = self.store.begin().await?;
        tx.lock_hierarchy().await?;

        let mut tenant = tx
            .find_tenant(tenant_id)
            .await?
            .ok_or(AppError::TenantNotFound(tenant_id))?;

        if new_parent_id == tenant_id {
            return Err(AppError::InvalidHierarchy {
                tenant_id,
                reason: "um tenant não pode ser pai de si mesmo".into(),
            });
        }
        if tx.find_tenant(new_parent_id).await?.is_none() {
            return Err(AppError::InvalidHierarchy {
                tenant_id,
                reason: format!("o tenant pai {new_parent_id} não existe"),
            });
        }

        // O novo pai não pode estar abaixo do tenant movido
        let chain = ancestors_in(&mut *tx, new_parent_id).await?;
        if chain.iter().any(|t| t.id == tenant_id) {
            return Err(AppError::InvalidHierarchy {
                tenant_id,
                reason: format!("{new_parent_id} é descendente de {tenant_id}; o vínculo criaria um ciclo"),
            });
        }

        tx.update_parent(tenant_id, new_parent_id).await?;
        tx.commit().await?;

        tracing::info!(tenant_id = %tenant_id, parent_id = %new_parent_id, "Tenant movido");
        tenant.parent_tenant_id = Some(new_parent_id);
        Ok(tenant)
    }

    pub async fn find(&self, tenant_id: Uuid) -> Result<Tenant, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_tenant(tenant_id)
            .await?
            .ok_or(AppError::TenantNotFound(tenant_id))
    }

    /// Ancestrais, da raiz até o pai (sem o próprio tenant).
    pub async fn ancestors_of(&self, tenant_id: Uuid) -> Result<Vec<Tenant>, AppError> {
        let mut tx = self.store.begin().await?;
        ancestors_in(&mut *tx, tenant_id).await
    }

    /// Descendentes em largura (sem o próprio tenant).
    pub async fn descendants_of(&self, tenant_id: Uuid) -> Result<Vec<Tenant>, AppError> {
        let mut tx = self.store.begin().await?;
        descendants_in(&mut *tx, tenant_id).await
    }

    pub async fn root_of(&self, tenant_id: Uuid) -> Result<Tenant, AppError> {
        let mut tx = self.store.begin().await?;
        root_in(&mut *tx, tenant_id).await
    }

    /// `target` precisa ser o próprio escopo ou estar abaixo dele.
    pub async fn ensure_in_scope(&self, scope_tenant_id: Uuid, target_id: Uuid) -> Result<(), AppError> {
        if scope_tenant_id == target_id {
            return Ok(());
        }

        let chain = self.ancestors_of(target_id).await?;
        if chain.iter().any(|t| t.id == scope_tenant_id) {
            Ok(())
        } else {
            Err(AppError::OutOfScope {
                scope_tenant_id,
                tenant_id: target_id,
            })
        }
    }

    /// Remove o tenant e toda a subárvore numa única transação, do nível mais
    /// profundo para o mais raso.
    pub async fn delete(&self, tenant_id: Uuid) -> Result<DeletionReport, AppError> {
        let mut tx = self.store.begin().await?;
        tx.lock_hierarchy().await?;

        if tx.find_tenant(tenant_id).await?.is_none() {
            return Err(AppError::TenantNotFound(tenant_id));
        }

        // 1. Enumera a subárvore (BFS) e inverte: filhos antes dos pais
        let mut order: Vec<Uuid> = descendants_in(&mut *tx, tenant_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        order.reverse();
        order.push(tenant_id);

        // 2. Tira as vendas em andamento da frente (ordem fixa evita deadlock)
        let mut lock_order = order.clone();
        lock_order.sort();
        for id in &lock_order {
            tx.lock_subscription(*id, LockMode::Exclusive).await?;
        }

        // 3. Apaga na ordem de dependência
        let mut report = DeletionReport {
            tenant_id,
            ..Default::default()
        };
        for id in &order {
            report.removed_sales += tx.purge_sales(*id).await?;
            report.removed_movements += tx.purge_stock(*id).await?;
            report.removed_subscriptions += tx.purge_subscriptions(*id).await?;
            report.removed_products += tx.purge_products(*id).await?;
            tx.delete_tenant(*id).await?;
        }
        report.removed_tenants = order;

        tx.commit().await?;

        // Caches não podem sobreviver aos dados
        for hook in &self.removal_hooks {
            hook.tenants_removed(&report.removed_tenants);
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            tenants = report.removed_tenants.len(),
            sales = report.removed_sales,
            movements = report.removed_movements,
            "Tenant removido em cascata"
        );
        self.audit.record(AuditEvent::TenantDeleted {
            tenant_id,
            removed_tenants: report.removed_tenants.len(),
        });

        Ok(report)
    }
}

// ---
// Caminhadas dentro de uma transação (usadas também pelo Gate e pelo Ledger)
// ---

pub(crate) async fn ancestors_in(tx: &mut dyn StoreTx, tenant_id: Uuid) -> Result<Vec<Tenant>, AppError> {
    let tenant = tx
        .find_tenant(tenant_id)
        .await?
        .ok_or(AppError::TenantNotFound(tenant_id))?;

    let mut chain = Vec::new();
    let mut seen = HashSet::from([tenant_id]);
    let mut next = tenant.parent_tenant_id;

    while let Some(parent_id) = next {
        if chain.len() >= MAX_HIERARCHY_DEPTH {
            return Err(AppError::InvalidHierarchy {
                tenant_id,
                reason: format!("mais de {MAX_HIERARCHY_DEPTH} níveis acima do tenant"),
            });
        }
        if !seen.insert(parent_id) {
            return Err(AppError::InvalidHierarchy {
                tenant_id,
                reason: format!("ciclo detectado em {parent_id}"),
            });
        }

        let parent = tx
            .find_tenant(parent_id)
            .await?
            .ok_or_else(|| AppError::InvalidHierarchy {
                tenant_id,
                reason: format!("o ancestral {parent_id} não existe"),
            })?;
        next = parent.parent_tenant_id;
        chain.push(parent);
    }

    chain.reverse();
    Ok(chain)
}

pub(crate) async fn descendants_in(tx: &mut dyn StoreTx, tenant_id: Uuid) -> Result<Vec<Tenant>, AppError> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([tenant_id]);
    let mut queue = VecDeque::from([(tenant_id, 0usize)]);

    while let Some((current, depth)) = queue.pop_front() {
        for child in tx.find_children(current).await? {
            if depth + 1 > MAX_HIERARCHY_DEPTH {
                return Err(AppError::InvalidHierarchy {
                    tenant_id,
                    reason: format!("mais de {MAX_HIERARCHY_DEPTH} níveis abaixo do tenant"),
                });
            }
            if !seen.insert(child.id) {
                return Err(AppError::InvalidHierarchy {
                    tenant_id,
                    reason: format!("ciclo detectado em {}", child.id),
                });
            }
            queue.push_back((child.id, depth + 1));
            found.push(child);
        }
    }

    Ok(found)
}

pub(crate) async fn root_in(tx: &mut dyn StoreTx, tenant_id: Uuid) -> Result<Tenant, AppError> {
    let mut chain = ancestors_in(tx, tenant_id).await?;
    if chain.is_empty() {
        return tx
            .find_tenant(tenant_id)
            .await?
            .ok_or(AppError::TenantNotFound(tenant_id));
    }
    Ok(chain.swap_remove(0))
}
