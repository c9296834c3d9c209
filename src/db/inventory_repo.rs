// src/db/inventory_repo.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Executor, PgConnection, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::inventory::{Product, StockKey, StockMovement},
};

// ---
// Linhas (mapeamento do banco)
// ---

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    tenant_id: Uuid,
    sku: String,
    name: String,
    is_service: bool,
    base_cost: Decimal,
    sale_price: Option<Decimal>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            sku: row.sku,
            name: row.name,
            is_service: row.is_service,
            base_cost: row.base_cost,
            sale_price: row.sale_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: Uuid,
    branch_id: Uuid,
    product_id: Uuid,
    delta: i64,
    kind: String,
    txn_ref: Uuid,
    reverses: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            branch_id: row.branch_id,
            product_id: row.product_id,
            delta: row.delta,
            kind: row.kind.parse()?,
            txn_ref: row.txn_ref,
            reverses: row.reverses,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

const MOVEMENT_COLUMNS: &str =
    "id, branch_id, product_id, delta, kind, txn_ref, reverses, notes, created_at";

#[derive(Clone, Copy, Default)]
pub struct InventoryRepository;

impl InventoryRepository {
    pub fn new() -> Self {
        Self
    }

    // ---
    // Produtos
    // ---

    pub async fn insert_product<'e, E>(&self, executor: E, product: &Product) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO products (id, tenant_id, sku, name, is_service, base_cost, sale_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(product.id)
        .bind(product.tenant_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.is_service)
        .bind(product.base_cost)
        .bind(product.sale_price)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(executor)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_foreign_key_violation() {
                    return AppError::TenantNotFound(product.tenant_id);
                }
            }
            e.into()
        })?;

        Ok(())
    }

    pub async fn find_product<'e, E>(&self, executor: E, product_id: Uuid) -> Result<Option<Product>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, tenant_id, sku, name, is_service, base_cost, sale_price, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(executor)
        .await?;

        Ok(row.map(Product::from))
    }

    pub async fn purge_products<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("DELETE FROM products WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    // ---
    // Livro-razão
    // ---

    /// Garante a linha de saldo e a trava (FOR UPDATE) até o fim da transação.
    /// As chaves precisam chegar ordenadas para evitar deadlock.
    pub async fn lock_balance(&self, conn: &mut PgConnection, key: StockKey) -> Result<i64, AppError> {
        // 1. Cria a linha se for a primeira movimentação da chave
        sqlx::query(
            r#"
            INSERT INTO stock_balances (branch_id, product_id, quantity)
            VALUES ($1, $2, 0)
            ON CONFLICT (branch_id, product_id) DO NOTHING
            "#,
        )
        .bind(key.branch_id)
        .bind(key.product_id)
        .execute(&mut *conn)
        .await?;

        // 2. Trava a linha e lê o saldo corrente
        let quantity = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT quantity FROM stock_balances
            WHERE branch_id = $1 AND product_id = $2
            FOR UPDATE
            "#,
        )
        .bind(key.branch_id)
        .bind(key.product_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(quantity)
    }

    /// Grava a movimentação e aplica o delta ao saldo corrente, na mesma transação.
    pub async fn insert_movement(&self, conn: &mut PgConnection, movement: &StockMovement) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (id, branch_id, product_id, delta, kind, txn_ref, reverses, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(movement.id)
        .bind(movement.branch_id)
        .bind(movement.product_id)
        .bind(movement.delta)
        .bind(movement.kind.as_str())
        .bind(movement.txn_ref)
        .bind(movement.reverses)
        .bind(movement.notes.as_deref())
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            // Índice único em 'reverses': a movimentação já tinha estorno
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    if let Some(original) = movement.reverses {
                        return AppError::AlreadyReversed {
                            movement_id: original,
                            reversal_id: movement.id,
                        };
                    }
                }
            }
            e.into()
        })?;

        sqlx::query(
            r#"
            UPDATE stock_balances
            SET quantity = quantity + $3, updated_at = NOW()
            WHERE branch_id = $1 AND product_id = $2
            "#,
        )
        .bind(movement.branch_id)
        .bind(movement.product_id)
        .bind(movement.delta)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn find_movement<'e, E>(&self, executor: E, movement_id: Uuid) -> Result<Option<StockMovement>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1");
        sqlx::query_as::<_, MovementRow>(&sql)
            .bind(movement_id)
            .fetch_optional(executor)
            .await?
            .map(StockMovement::try_from)
            .transpose()
    }

    pub async fn find_reversal<'e, E>(&self, executor: E, movement_id: Uuid) -> Result<Option<StockMovement>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE reverses = $1 LIMIT 1");
        sqlx::query_as::<_, MovementRow>(&sql)
            .bind(movement_id)
            .fetch_optional(executor)
            .await?
            .map(StockMovement::try_from)
            .transpose()
    }

    pub async fn movements_for<'e, E>(&self, executor: E, key: StockKey) -> Result<Vec<StockMovement>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE branch_id = $1 AND product_id = $2 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, MovementRow>(&sql)
            .bind(key.branch_id)
            .bind(key.product_id)
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(StockMovement::try_from)
            .collect()
    }

    /// O saldo "de verdade": soma de todos os deltas da chave.
    pub async fn sum_deltas<'e, E>(&self, executor: E, key: StockKey) -> Result<i64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(delta), 0)::BIGINT
            FROM stock_movements
            WHERE branch_id = $1 AND product_id = $2
            "#,
        )
        .bind(key.branch_id)
        .bind(key.product_id)
        .fetch_one(executor)
        .await?;
        Ok(total)
    }

    pub async fn running_balance<'e, E>(&self, executor: E, key: StockKey) -> Result<Option<i64>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let quantity = sqlx::query_scalar::<_, i64>(
            "SELECT quantity FROM stock_balances WHERE branch_id = $1 AND product_id = $2",
        )
        .bind(key.branch_id)
        .bind(key.product_id)
        .fetch_optional(executor)
        .await?;
        Ok(quantity)
    }

    /// Remove movimentações e saldos de uma filial (somente na remoção em cascata).
    pub async fn purge_stock(&self, conn: &mut PgConnection, branch_id: Uuid) -> Result<u64, AppError> {
        let removed = sqlx::query("DELETE FROM stock_movements WHERE branch_id = $1")
            .bind(branch_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM stock_balances WHERE branch_id = $1")
            .bind(branch_id)
            .execute(&mut *conn)
            .await?;

        Ok(removed)
    }
}
