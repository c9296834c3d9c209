// src/db/tenancy_repo.rs

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::tenancy::Tenant};

// Chave do advisory lock que serializa mudanças na árvore de tenants
const HIERARCHY_LOCK_KEY: i64 = 0x7465_6e61_6e74;

// Linha da tabela 'tenants' (mapeamento separado da entidade)
#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    parent_tenant_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            parent_tenant_id: row.parent_tenant_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct TenantRepository;

impl TenantRepository {
    pub fn new() -> Self {
        Self
    }

    /// Cria um tenant (raiz ou filial).
    pub async fn insert<'e, E>(&self, executor: E, tenant: &Tenant) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, description, parent_tenant_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(tenant.description.as_deref())
        .bind(tenant.parent_tenant_id)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(executor)
        .await
        .map_err(|e| {
            // FK violada = o pai sumiu entre a leitura e a escrita
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_foreign_key_violation() {
                    return AppError::InvalidHierarchy {
                        tenant_id: tenant.id,
                        reason: "o tenant pai não existe".into(),
                    };
                }
            }
            e.into()
        })?;

        Ok(())
    }

    pub async fn find_by_id<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, description, parent_tenant_id, created_at, updated_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(executor)
        .await?;

        Ok(row.map(Tenant::from))
    }

    pub async fn find_children<'e, E>(&self, executor: E, parent_id: Uuid) -> Result<Vec<Tenant>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, description, parent_tenant_id, created_at, updated_at
            FROM tenants
            WHERE parent_tenant_id = $1
            ORDER BY name ASC, id ASC
            "#,
        )
        .bind(parent_id)
        .fetch_all(executor)
        .await?;

        Ok(rows.into_iter().map(Tenant::from).collect())
    }

    pub async fn update_parent<'e, E>(&self, executor: E, tenant_id: Uuid, parent_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE tenants SET parent_tenant_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(tenant_id)
            .bind(parent_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn delete<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Advisory lock de transação: liberado sozinho no commit/rollback.
    pub async fn lock_hierarchy<'e, E>(&self, executor: E) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(HIERARCHY_LOCK_KEY)
            .execute(executor)
            .await?;
        Ok(())
    }
}
