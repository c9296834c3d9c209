// src/services/subscription_service.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{LockMode, Store, StoreTx},
    models::subscription::{ActiveBranchSubscription, Authorization, NewPlan, SubscriptionPlan},
    services::{
        events::{AuditEvent, AuditSink},
        tenancy_service::TenantRemovalHook,
    },
};

const AUTH_CACHE_CAPACITY: u64 = 10_000;

/// O Gate: decide se uma filial pode movimentar estoque e vender.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    // Só aprovações entram no cache, chaveadas pela filial
    approvals: Cache<Uuid, Authorization>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditSink>, cache_ttl: Duration) -> Self {
        let approvals = Cache::builder()
            .max_capacity(AUTH_CACHE_CAPACITY)
            .time_to_live(cache_ttl)
            .build();
        Self {
            store,
            audit,
            approvals,
        }
    }

    // ---
    // Planos
    // ---

    pub async fn create_plan(&self, attrs: NewPlan) -> Result<SubscriptionPlan, AppError> {
        let plan = SubscriptionPlan::new(attrs)?;

        let mut tx = self.store.begin().await?;
        tx.insert_plan(&plan).await?;
        tx.commit().await?;

        tracing::info!(plan_id = %plan.id, "Plano criado: {}", plan.name);
        Ok(plan)
    }

    pub async fn find_plan(&self, plan_id: Uuid) -> Result<SubscriptionPlan, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_plan(plan_id)
            .await?
            .ok_or(AppError::PlanNotFound(plan_id))
    }

    // ---
    // Assinaturas
    // ---

    /// Assina `plan_id` para a filial. Sem `ends_at`, o fim vem da duração do plano.
    pub async fn subscribe(
        &self,
        branch_id: Uuid,
        plan_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Result<ActiveBranchSubscription, AppError> {
        let mut tx = self.store.begin().await?;

        // 1. Só filiais assinam; a raiz é sempre autorizada
        let branch = tx
            .find_tenant(branch_id)
            .await?
            .ok_or(AppError::TenantNotFound(branch_id))?;
        if branch.is_root() {
            return Err(AppError::InvalidHierarchy {
                tenant_id: branch_id,
                reason: "tenants raiz não recebem assinatura".into(),
            });
        }

        let plan = tx
            .find_plan(plan_id)
            .await?
            .ok_or(AppError::PlanNotFound(plan_id))?;

        // 2. Trava exclusiva: nenhuma venda da filial revalida no meio da troca
        tx.lock_subscription(branch_id, LockMode::Exclusive).await?;

        let ends_at = ends_at.or_else(|| plan.default_end(starts_at));
        let subscription = ActiveBranchSubscription::new(branch_id, plan.id, starts_at, ends_at)?;

        // 3. Uma janela por instante
        let existing = tx.subscriptions_for_branch(branch_id).await?;
        if let Some(clash) = existing.iter().find(|s| s.overlaps(starts_at, ends_at)) {
            return Err(AppError::OverlappingSubscription {
                branch_id,
                existing_id: clash.id,
            });
        }

        tx.insert_subscription(&subscription).await?;
        tx.commit().await?;

        self.after_change(&subscription);
        tracing::info!(
            branch_id = %branch_id,
            subscription_id = %subscription.id,
            "Assinatura do plano '{}' registrada",
            plan.name
        );
        Ok(subscription)
    }

    /// Encerra a assinatura em `at`. Assinaturas já encerradas voltam como estão.
    pub async fn cancel(&self, subscription_id: Uuid, at: DateTime<Utc>) -> Result<ActiveBranchSubscription, AppError> {
        let mut tx = self.store.begin().await?;

        let current = tx
            .find_subscription(subscription_id)
            .await?
            .ok_or(AppError::SubscriptionNotFound(subscription_id))?;

        tx.lock_subscription(current.branch_id, LockMode::Exclusive).await?;

        // Relê depois da trava: outro cancelamento pode ter passado na frente
        let mut subscription = tx
            .find_subscription(subscription_id)
            .await?
            .ok_or(AppError::SubscriptionNotFound(subscription_id))?;

        if subscription.ends_at.is_some_and(|end| end <= at) {
            return Ok(subscription);
        }
        if at <= subscription.starts_at {
            return Err(AppError::InvalidWindow {
                starts_at: subscription.starts_at,
                ends_at: at,
            });
        }

        tx.update_subscription_end(subscription_id, at).await?;
        tx.commit().await?;

        subscription.ends_at = Some(at);
        self.after_change(&subscription);
        tracing::info!(
            branch_id = %subscription.branch_id,
            subscription_id = %subscription_id,
            "Assinatura encerrada em {}",
            at
        );
        Ok(subscription)
    }

    pub async fn find_subscription(&self, subscription_id: Uuid) -> Result<ActiveBranchSubscription, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_subscription(subscription_id)
            .await?
            .ok_or(AppError::SubscriptionNotFound(subscription_id))
    }

    pub async fn subscriptions_of(&self, branch_id: Uuid) -> Result<Vec<ActiveBranchSubscription>, AppError> {
        let mut tx = self.store.begin().await?;
        if tx.find_tenant(branch_id).await?.is_none() {
            return Err(AppError::TenantNotFound(branch_id));
        }
        tx.subscriptions_for_branch(branch_id).await
    }

    fn after_change(&self, subscription: &ActiveBranchSubscription) {
        // A posição no limite do plano depende das irmãs: o cache inteiro cai
        self.approvals.invalidate_all();
        self.audit.record(AuditEvent::SubscriptionChanged {
            branch_id: subscription.branch_id,
            subscription_id: subscription.id,
        });
    }

    pub fn invalidate_cache(&self) {
        self.approvals.invalidate_all();
    }

    // ---
    // Autorização
    // ---

    /// Autorização de entrada (com cache). Negações não são guardadas.
    pub async fn authorize(&self, branch_id: Uuid, at: DateTime<Utc>) -> Result<Authorization, AppError> {
        if let Some(cached) = self.approvals.get(&branch_id).await {
            if cached.valid_at(at) {
                self.grant(branch_id, at, true);
                return Ok(Authorization {
                    authorized_at: at,
                    ..cached
                });
            }
        }

        let mut tx = self.store.begin().await?;
        match evaluate(&mut *tx, branch_id, at).await {
            Ok(authorization) => {
                self.approvals.insert(branch_id, authorization.clone()).await;
                self.grant(branch_id, at, false);
                Ok(authorization)
            }
            Err(e) => {
                if e.is_denial() {
                    self.deny(branch_id, at, &e);
                }
                Err(e)
            }
        }
    }

    /// Revalidação sem cache dentro da transação de quem chama. A trava
    /// compartilhada segura cancelamentos até o commit.
    pub(crate) async fn authorize_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        branch_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Authorization, AppError> {
        tx.lock_subscription(branch_id, LockMode::Shared).await?;
        let result = evaluate(tx, branch_id, at).await;
        match &result {
            Ok(_) => self.grant(branch_id, at, false),
            Err(e) if e.is_denial() => self.deny(branch_id, at, e),
            Err(_) => {}
        }
        result
    }

    fn grant(&self, branch_id: Uuid, at: DateTime<Utc>, cached: bool) {
        tracing::debug!(branch_id = %branch_id, cached, "Autorização concedida");
        self.audit.record(AuditEvent::AuthorizationGranted { branch_id, at, cached });
    }

    fn deny(&self, branch_id: Uuid, at: DateTime<Utc>, err: &AppError) {
        tracing::warn!(branch_id = %branch_id, "Autorização negada: {}", err);
        self.audit.record(AuditEvent::AuthorizationDenied {
            branch_id,
            code: err.code(),
            at,
        });
    }
}

impl TenantRemovalHook for SubscriptionService {
    fn tenants_removed(&self, _tenant_ids: &[Uuid]) {
        // Ranks de limite dependem das irmãs: limpa tudo
        self.invalidate_cache();
    }
}

/// Regra do Gate, sem cache e sem travas.
async fn evaluate(tx: &mut dyn StoreTx, branch_id: Uuid, at: DateTime<Utc>) -> Result<Authorization, AppError> {
    let branch = tx
        .find_tenant(branch_id)
        .await?
        .ok_or(AppError::TenantNotFound(branch_id))?;

    // 1. Raiz sempre pode
    let Some(parent_id) = branch.parent_tenant_id else {
        return Ok(Authorization::root(branch_id, at));
    };

    // 2. Precisa de uma assinatura cuja janela contenha `at`
    let current = tx
        .subscriptions_for_branch(branch_id)
        .await?
        .into_iter()
        .find(|s| s.covers(at))
        .ok_or(AppError::NoActiveSubscription { branch_id, at })?;

    let plan = tx
        .find_plan(current.plan_id)
        .await?
        .ok_or(AppError::PlanNotFound(current.plan_id))?;

    // 3. Limite do plano: as filiais irmãs ativas são ordenadas por
    //    (início, id); quem passa do limite fica de fora
    if let Some(limit) = plan.max_active_branches {
        let siblings = tx.effective_subscriptions_under(parent_id, at).await?;
        let ahead = siblings
            .iter()
            .filter(|s| s.branch_id != branch_id)
            .filter(|s| (s.starts_at, s.branch_id) < (current.starts_at, branch_id))
            .count();

        if ahead >= usize::try_from(limit).unwrap_or(0) {
            return Err(AppError::PlanLimitExceeded {
                branch_id,
                plan_id: plan.id,
                plan_name: plan.name,
                limit,
            });
        }
    }

    Ok(Authorization::for_subscription(current, at))
}
