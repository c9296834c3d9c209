// src/db/subscription_repo.rs

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::LockMode,
    models::subscription::{ActiveBranchSubscription, SubscriptionPlan},
};

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    max_active_branches: Option<i32>,
    duration_days: Option<i32>,
    created_at: DateTime<Utc>,
}

impl From<PlanRow> for SubscriptionPlan {
    fn from(row: PlanRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            max_active_branches: row.max_active_branches,
            duration_days: row.duration_days,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    branch_id: Uuid,
    plan_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for ActiveBranchSubscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            id: row.id,
            branch_id: row.branch_id,
            plan_id: row.plan_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn insert_plan<'e, E>(&self, executor: E, plan: &SubscriptionPlan) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO subscription_plans (id, name, max_active_branches, duration_days, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.max_active_branches)
        .bind(plan.duration_days)
        .bind(plan.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_plan<'e, E>(&self, executor: E, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, max_active_branches, duration_days, created_at FROM subscription_plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(SubscriptionPlan::from))
    }

    pub async fn insert_subscription<'e, E>(
        &self,
        executor: E,
        sub: &ActiveBranchSubscription,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO branch_subscriptions (id, branch_id, plan_id, starts_at, ends_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(sub.id)
        .bind(sub.branch_id)
        .bind(sub.plan_id)
        .bind(sub.starts_at)
        .bind(sub.ends_at)
        .bind(sub.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_subscription<'e, E>(
        &self,
        executor: E,
        subscription_id: Uuid,
    ) -> Result<Option<ActiveBranchSubscription>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, branch_id, plan_id, starts_at, ends_at, created_at
            FROM branch_subscriptions
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(ActiveBranchSubscription::from))
    }

    pub async fn for_branch<'e, E>(
        &self,
        executor: E,
        branch_id: Uuid,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, branch_id, plan_id, starts_at, ends_at, created_at
            FROM branch_subscriptions
            WHERE branch_id = $1
            ORDER BY starts_at ASC
            "#,
        )
        .bind(branch_id)
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(ActiveBranchSubscription::from).collect())
    }

    /// Assinaturas vigentes em `at` das filiais filhas de `parent_id`.
    pub async fn effective_under<'e, E>(
        &self,
        executor: E,
        parent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveBranchSubscription>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT s.id, s.branch_id, s.plan_id, s.starts_at, s.ends_at, s.created_at
            FROM branch_subscriptions s
            JOIN tenants t ON t.id = s.branch_id
            WHERE t.parent_tenant_id = $1
              AND s.starts_at <= $2
              AND (s.ends_at IS NULL OR s.ends_at > $2)
            "#,
        )
        .bind(parent_id)
        .bind(at)
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(ActiveBranchSubscription::from).collect())
    }

    pub async fn update_end<'e, E>(
        &self,
        executor: E,
        subscription_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE branch_subscriptions SET ends_at = $2 WHERE id = $1")
            .bind(subscription_id)
            .bind(ends_at)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// A linha do tenant é o ponto de serialização das assinaturas da filial:
    /// FOR SHARE nas vendas, FOR NO KEY UPDATE em subscribe/cancel.
    pub async fn lock_branch<'e, E>(&self, executor: E, branch_id: Uuid, mode: LockMode) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = match mode {
            LockMode::Shared => "SELECT id FROM tenants WHERE id = $1 FOR SHARE",
            LockMode::Exclusive => "SELECT id FROM tenants WHERE id = $1 FOR NO KEY UPDATE",
        };
        sqlx::query(sql).bind(branch_id).fetch_optional(executor).await?;
        Ok(())
    }

    pub async fn purge<'e, E>(&self, executor: E, branch_id: Uuid) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("DELETE FROM branch_subscriptions WHERE branch_id = $1")
            .bind(branch_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
