// src/handlers/inventory.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    common::error::AppError,
    config::AppState,
    handlers::subscriptions::AtQuery,
    middleware::tenancy::TenantContext,
    models::inventory::NewProduct,
    services::{StockChangeKind, StockLine},
};

// ---
// Validação customizada
// ---
pub(crate) fn validate_not_negative(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() {
        let mut err = ValidationError::new("range");
        err.add_param("min".into(), &0.0);
        err.message = Some("O valor não pode ser negativo.".into());
        return Err(err);
    }
    Ok(())
}

// ---
// Payloads
// ---
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductPayload {
    // Sem tenant explícito, o produto pertence ao escopo de quem chama
    pub tenant_id: Option<Uuid>,

    #[validate(length(min = 1, message = "O SKU é obrigatório."))]
    pub sku: String,

    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,

    #[serde(default)]
    pub is_service: bool,

    #[validate(custom(function = "validate_not_negative"))]
    #[serde(default)]
    pub base_cost: Decimal,

    #[validate(custom(function = "validate_not_negative"))]
    pub sale_price: Option<Decimal>,
}

// Delta zero ou com sinal trocado para o tipo é recusado pelo livro-razão
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLinePayload {
    pub product_id: Uuid,
    pub delta: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StockChangePayload {
    pub kind: StockChangeKind,

    #[validate(length(min = 1, message = "Informe ao menos uma linha."))]
    pub lines: Vec<StockLinePayload>,

    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub from_branch_id: Uuid,
    pub to_branch_id: Uuid,
    pub product_id: Uuid,

    #[validate(range(min = 1, message = "A quantidade deve ser positiva."))]
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
}

// ---
// Produtos
// ---
pub async fn create_product(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateProductPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let tenant_id = payload.tenant_id.unwrap_or(ctx.0);
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;

    let product = app_state
        .product_service
        .create_product(
            tenant_id,
            NewProduct {
                sku: payload.sku,
                name: payload.name,
                is_service: payload.is_service,
                base_cost: payload.base_cost,
                sale_price: payload.sale_price,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get_product(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let product = app_state.product_service.find(product_id).await?;

    // Visível para o dono, para quem está acima dele e para as filiais abaixo
    let tenants = &app_state.tenant_service;
    if tenants.ensure_in_scope(ctx.0, product.tenant_id).await.is_err() {
        tenants.ensure_in_scope(product.tenant_id, ctx.0).await?;
    }
    Ok(Json(product))
}

// ---
// Saldos e livro-razão
// ---
pub async fn get_balance(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;

    let quantity = app_state
        .ledger_service
        .current_balance(branch_id, product_id)
        .await?;
    Ok(Json(BalanceResponse {
        branch_id,
        product_id,
        quantity,
    }))
}

pub async fn list_movements(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;
    let movements = app_state
        .ledger_service
        .movements_of(branch_id, product_id)
        .await?;
    Ok(Json(movements))
}

pub async fn reconcile(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path((branch_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;
    let report = app_state.ledger_service.reconcile(branch_id, product_id).await?;
    Ok(Json(report))
}

/// Saldo somado do tenant e de todas as filiais abaixo dele.
pub async fn get_aggregate_balance(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path((tenant_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;
    let balance = app_state
        .ledger_service
        .balance_under(tenant_id, product_id)
        .await?;
    Ok(Json(balance))
}

// ---
// Movimentações (sempre passam pelo Gate)
// ---
pub async fn stock_change(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(branch_id): Path<Uuid>,
    Json(payload): Json<StockChangePayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;

    let lines = payload
        .lines
        .iter()
        .map(|l| StockLine {
            product_id: l.product_id,
            delta: l.delta,
        })
        .collect();

    let movements = app_state
        .sale_service
        .commit_stock_change(branch_id, lines, payload.kind, Utc::now(), payload.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(movements)))
}

pub async fn transfer(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<TransferPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    app_state
        .tenant_service
        .ensure_in_scope(ctx.0, payload.from_branch_id)
        .await?;
    app_state
        .tenant_service
        .ensure_in_scope(ctx.0, payload.to_branch_id)
        .await?;

    let transfer = app_state
        .sale_service
        .transfer(
            payload.from_branch_id,
            payload.to_branch_id,
            payload.product_id,
            payload.quantity,
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

pub async fn reverse_movement(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(movement_id): Path<Uuid>,
    Query(query): Query<AtQuery>,
) -> Result<impl IntoResponse, AppError> {
    let original = app_state.ledger_service.find_movement(movement_id).await?;
    app_state
        .tenant_service
        .ensure_in_scope(ctx.0, original.branch_id)
        .await?;

    let reversal = app_state
        .sale_service
        .reverse_movement(movement_id, query.at.unwrap_or_else(Utc::now))
        .await?;
    Ok((StatusCode::CREATED, Json(reversal)))
}
