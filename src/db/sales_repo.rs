// src/db/sales_repo.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::sales::{Sale, SaleItem},
};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: Uuid,
    branch_id: Uuid,
    total_amount: Decimal,
    committed_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    id: Uuid,
    sale_id: Uuid,
    line_no: i32,
    product_id: Uuid,
    quantity: i64,
    unit_price: Decimal,
    line_total: Decimal,
    movement_id: Option<Uuid>,
}

impl From<SaleItemRow> for SaleItem {
    fn from(row: SaleItemRow) -> Self {
        Self {
            id: row.id,
            sale_id: row.sale_id,
            line_no: row.line_no,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            line_total: row.line_total,
            movement_id: row.movement_id,
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct SalesRepository;

impl SalesRepository {
    pub fn new() -> Self {
        Self
    }

    /// Grava a venda e seus itens. Precisa rodar na mesma transação das movimentações.
    pub async fn insert_sale(&self, conn: &mut PgConnection, sale: &Sale) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sales (id, branch_id, total_amount, committed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(sale.id)
        .bind(sale.branch_id)
        .bind(sale.total_amount)
        .bind(sale.committed_at)
        .execute(&mut *conn)
        .await?;

        for item in &sale.items {
            sqlx::query(
                r#"
                INSERT INTO sale_items (id, sale_id, line_no, product_id, quantity, unit_price, line_total, movement_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(item.sale_id)
            .bind(item.line_no)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(item.movement_id)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn find_sale(&self, conn: &mut PgConnection, sale_id: Uuid) -> Result<Option<Sale>, AppError> {
        let Some(row) = sqlx::query_as::<_, SaleRow>(
            "SELECT id, branch_id, total_amount, committed_at FROM sales WHERE id = $1",
        )
        .bind(sale_id)
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, SaleItemRow>(
            r#"
            SELECT id, sale_id, line_no, product_id, quantity, unit_price, line_total, movement_id
            FROM sale_items
            WHERE sale_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(Sale {
            id: row.id,
            branch_id: row.branch_id,
            total_amount: row.total_amount,
            committed_at: row.committed_at,
            items: items.into_iter().map(SaleItem::from).collect(),
        }))
    }

    /// Itens primeiro, depois as vendas (ordem de dependência).
    pub async fn purge_sales(&self, conn: &mut PgConnection, branch_id: Uuid) -> Result<u64, AppError> {
        sqlx::query(
            r#"
            DELETE FROM sale_items
            WHERE sale_id IN (SELECT id FROM sales WHERE branch_id = $1)
            "#,
        )
        .bind(branch_id)
        .execute(&mut *conn)
        .await?;

        let removed = sqlx::query("DELETE FROM sales WHERE branch_id = $1")
            .bind(branch_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        Ok(removed)
    }
}
