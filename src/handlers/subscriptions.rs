// src/handlers/subscriptions.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::TenantContext,
    models::subscription::NewPlan,
};

// ---
// Payloads
// ---
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanPayload {
    #[validate(length(min = 1, message = "O nome do plano é obrigatório."))]
    pub name: String,

    #[validate(range(min = 1, message = "O limite de filiais deve ser pelo menos 1."))]
    pub max_active_branches: Option<i32>,

    #[validate(range(min = 1, message = "A duração deve ser de pelo menos 1 dia."))]
    pub duration_days: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub plan_id: Uuid,
    // Sem início = agora; sem fim = duração do plano
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AtQuery {
    pub at: Option<DateTime<Utc>>,
}

// ---
// Handlers
// ---

// Planos são globais (catálogo do operador)
pub async fn create_plan(
    State(app_state): State<AppState>,
    Json(payload): Json<CreatePlanPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let plan = app_state
        .subscription_service
        .create_plan(NewPlan {
            name: payload.name,
            max_active_branches: payload.max_active_branches,
            duration_days: payload.duration_days,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn get_plan(
    State(app_state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let plan = app_state.subscription_service.find_plan(plan_id).await?;
    Ok(Json(plan))
}

pub async fn subscribe(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(branch_id): Path<Uuid>,
    Json(payload): Json<SubscribePayload>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;

    let subscription = app_state
        .subscription_service
        .subscribe(
            branch_id,
            payload.plan_id,
            payload.starts_at.unwrap_or_else(Utc::now),
            payload.ends_at,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list_subscriptions(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(branch_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;
    let subscriptions = app_state.subscription_service.subscriptions_of(branch_id).await?;
    Ok(Json(subscriptions))
}

pub async fn cancel_subscription(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(subscription_id): Path<Uuid>,
    Query(query): Query<AtQuery>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = app_state
        .subscription_service
        .find_subscription(subscription_id)
        .await?;
    app_state
        .tenant_service
        .ensure_in_scope(ctx.0, subscription.branch_id)
        .await?;

    let cancelled = app_state
        .subscription_service
        .cancel(subscription_id, query.at.unwrap_or_else(Utc::now))
        .await?;
    Ok(Json(cancelled))
}

/// Consulta o Gate sem movimentar nada.
pub async fn get_authorization(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(branch_id): Path<Uuid>,
    Query(query): Query<AtQuery>,
) -> Result<impl IntoResponse, AppError> {
    app_state.tenant_service.ensure_in_scope(ctx.0, branch_id).await?;

    let authorization = app_state
        .subscription_service
        .authorize(branch_id, query.at.unwrap_or_else(Utc::now))
        .await?;
    Ok(Json(authorization))
}
