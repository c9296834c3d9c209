// src/handlers/tenancy.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::TenantContext,
    models::tenancy::NewTenant,
};

// ---
// Payloads
// ---
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantPayload {
    #[validate(length(min = 1, message = "O nome do estabelecimento é obrigatório."))]
    pub name: String,
    pub description: Option<String>,
}

impl From<CreateTenantPayload> for NewTenant {
    fn from(payload: CreateTenantPayload) -> Self {
        NewTenant {
            name: payload.name,
            description: payload.description,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReparentPayload {
    pub parent_id: Uuid,
}

// Confirmação em duas fases: o cliente repete o id do tenant
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub confirm: Option<Uuid>,
}

// ---
// Handlers
// ---

/// Cria um negócio novo (tenant raiz). Não depende do escopo de quem chama.
pub async fn create_root(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateTenantPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let tenant = app_state.tenant_service.create_root(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn create_branch(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(parent_id): Path<Uuid>,
    Json(payload): Json<CreateTenantPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    app_state.tenant_service.ensure_in_scope(ctx.0, parent_id).await?;

    let branch = app_state
        .tenant_service
        .create_child(parent_id, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

pub async fn get_tenant(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;
    let tenant = app_state.tenant_service.find(tenant_id).await?;
    Ok(Json(tenant))
}

pub async fn get_ancestors(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;
    let ancestors = app_state.tenant_service.ancestors_of(tenant_id).await?;
    Ok(Json(ancestors))
}

pub async fn get_descendants(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;
    let descendants = app_state.tenant_service.descendants_of(tenant_id).await?;
    Ok(Json(descendants))
}

pub async fn get_root(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;
    let root = app_state.tenant_service.root_of(tenant_id).await?;
    Ok(Json(root))
}

pub async fn reparent(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<ReparentPayload>,
) -> Result<impl IntoResponse, AppError> {
    // Origem e destino precisam estar no escopo
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;
    app_state
        .tenant_service
        .ensure_in_scope(ctx.0, payload.parent_id)
        .await?;

    let tenant = app_state
        .tenant_service
        .reparent(tenant_id, payload.parent_id)
        .await?;
    Ok(Json(tenant))
}

pub async fn delete_tenant(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.confirm != Some(tenant_id) {
        return Err(AppError::MissingField("confirm"));
    }
    app_state.tenant_service.ensure_in_scope(ctx.0, tenant_id).await?;

    let report = app_state.tenant_service.delete(tenant_id).await?;
    Ok(Json(report))
}
