// src/handlers/sales.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    handlers::inventory::validate_not_negative,
    middleware::tenancy::TenantContext,
    models::sales::LineItem,
};

// ---
// Payloads
// ---
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaleLinePayload {
    pub product_id: Uuid,

    #[validate(range(min = 1, message = "A quantidade deve ser positiva."))]
    pub quantity: i64,

    #[validate(custom(function = "validate_not_negative"))]
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SellPayload {
    #[validate(length(min = 1, message = "A venda precisa de ao menos um item."), nested)]
    pub items: Vec<SaleLinePayload>,
}

// ---
// Handlers
// ---
pub async fn sell(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(branch_id): Path<Uuid>,
    Json(payload): Json<SellPayload>,
) -> Result<impl IntoResponse, AppError> {
    // 1. Validar o payload
    payload.validate()?;

    // 2. A filial precisa estar no escopo de quem chama
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;

    // 3. Coordenador: Gate -> Ledger -> venda, numa transação
    let lines = payload
        .items
        .into_iter()
        .map(|item| LineItem::new(item.product_id, item.quantity, item.unit_price))
        .collect();

    let sale = app_state
        .sale_service
        .commit_sale(branch_id, lines, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(sale)))
}

pub async fn get_sale(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(sale_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let sale = app_state.sale_service.find_sale(sale_id).await?;
    app_state
        .tenant_service
        .ensure_in_scope(ctx.0, sale.branch_id)
        .await?;
    Ok(Json(sale))
}
