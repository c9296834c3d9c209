// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

// SQLSTATEs que o Postgres usa para conflitos de concorrência (retentáveis)
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
// statement_timeout / lock_timeout
const QUERY_CANCELED: &str = "57014";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Uma linha do lote que deixaria o saldo negativo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockShortage {
    /// Índice da linha no pedido original (linha da venda, ou posição no lote)
    pub line: usize,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub available: i64,
    pub requested: i64,
}

fn describe_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(|s| {
            format!(
                "linha {} (filial {}, produto {}: disponível {}, pedido {})",
                s.line, s.branch_id, s.product_id, s.available, s.requested
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum AppError {
    // --- Hierarquia ---
    #[error("Hierarquia inválida para o tenant {tenant_id}: {reason}")]
    InvalidHierarchy { tenant_id: Uuid, reason: String },

    #[error("Tenant {0} não encontrado")]
    TenantNotFound(Uuid),

    #[error("O tenant {tenant_id} está fora do escopo de {scope_tenant_id}")]
    OutOfScope { scope_tenant_id: Uuid, tenant_id: Uuid },

    // --- Assinaturas (Gate) ---
    #[error("A filial {branch_id} não possui assinatura ativa em {at}")]
    NoActiveSubscription { branch_id: Uuid, at: DateTime<Utc> },

    #[error("A filial {branch_id} excede o limite de {limit} filiais ativas do plano '{plan_name}'")]
    PlanLimitExceeded {
        branch_id: Uuid,
        plan_id: Uuid,
        plan_name: String,
        limit: i32,
    },

    #[error("Plano {0} não encontrado")]
    PlanNotFound(Uuid),

    #[error("Assinatura {0} não encontrada")]
    SubscriptionNotFound(Uuid),

    #[error("A filial {branch_id} já possui a assinatura {existing_id} nesse período")]
    OverlappingSubscription { branch_id: Uuid, existing_id: Uuid },

    #[error("Período inválido: início {starts_at}, fim {ends_at}")]
    InvalidWindow {
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },

    // --- Produtos e estoque ---
    #[error("Produto {0} não encontrado")]
    ProductNotFound(Uuid),

    #[error("Produto {product_id} inválido para a filial {branch_id}{}: {reason}", fmt_line(.line))]
    InvalidProduct {
        branch_id: Uuid,
        product_id: Uuid,
        line: Option<usize>,
        reason: String,
    },

    #[error("Quantidade inválida ({quantity}) para o produto {product_id}: {reason}")]
    InvalidQuantity {
        product_id: Uuid,
        quantity: i64,
        reason: String,
    },

    #[error("Estoque insuficiente: {}", describe_shortages(.shortages))]
    InsufficientStock { shortages: Vec<StockShortage> },

    #[error("Movimentação {0} não encontrada")]
    MovementNotFound(Uuid),

    #[error("A movimentação {movement_id} já foi estornada por {reversal_id}")]
    AlreadyReversed { movement_id: Uuid, reversal_id: Uuid },

    #[error("Venda {0} não encontrada")]
    SaleNotFound(Uuid),

    #[error("Campo obrigatório ausente: {0}")]
    MissingField(&'static str),

    #[error("Valor inválido em {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    // --- Infraestrutura ---
    #[error("Falha transitória: {0}")]
    TransientFailure(String),

    #[error("Conflito de concorrência: {0}")]
    ConflictAborted(String),

    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Erro de banco de dados: {0}")]
    DatabaseError(sqlx::Error),

    // Variante genérica para qualquer outro erro inesperado
    #[error("Erro interno do servidor: {0}")]
    InternalServerError(#[from] anyhow::Error),
}

fn fmt_line(line: &Option<usize>) -> String {
    line.map(|l| format!(" (linha {l})")).unwrap_or_default()
}

// O '?' em chamadas sqlx passa por aqui: classificamos o erro para que o
// coordenador saiba o que pode ser retentado.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if matches!(
            e,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ) {
            return AppError::TransientFailure(e.to_string());
        }

        let code = match &e {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
            _ => None,
        };

        match code.as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                AppError::ConflictAborted(e.to_string())
            }
            Some(QUERY_CANCELED) | Some(LOCK_NOT_AVAILABLE) => {
                AppError::TransientFailure(e.to_string())
            }
            _ => AppError::DatabaseError(e),
        }
    }
}

impl AppError {
    /// Erros que o coordenador de vendas pode tentar novamente.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransientFailure(_) | AppError::ConflictAborted(_)
        )
    }

    /// Negações do Gate (a filial não pode transacionar).
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AppError::NoActiveSubscription { .. } | AppError::PlanLimitExceeded { .. }
        )
    }

    /// Código estável enviado ao cliente junto da mensagem.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidHierarchy { .. } => "INVALID_HIERARCHY",
            AppError::TenantNotFound(_) => "TENANT_NOT_FOUND",
            AppError::OutOfScope { .. } => "OUT_OF_SCOPE",
            AppError::NoActiveSubscription { .. } => "NO_ACTIVE_SUBSCRIPTION",
            AppError::PlanLimitExceeded { .. } => "PLAN_LIMIT_EXCEEDED",
            AppError::PlanNotFound(_) => "PLAN_NOT_FOUND",
            AppError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            AppError::OverlappingSubscription { .. } => "OVERLAPPING_SUBSCRIPTION",
            AppError::InvalidWindow { .. } => "INVALID_WINDOW",
            AppError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            AppError::InvalidProduct { .. } => "INVALID_PRODUCT",
            AppError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::MovementNotFound(_) => "MOVEMENT_NOT_FOUND",
            AppError::AlreadyReversed { .. } => "ALREADY_REVERSED",
            AppError::SaleNotFound(_) => "SALE_NOT_FOUND",
            AppError::MissingField(_) => "MISSING_FIELD",
            AppError::InvalidField { .. } => "INVALID_FIELD",
            AppError::TransientFailure(_) => "TRANSIENT_FAILURE",
            AppError::ConflictAborted(_) => "CONFLICT_ABORTED",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::TenantNotFound(_)
            | AppError::PlanNotFound(_)
            | AppError::SubscriptionNotFound(_)
            | AppError::ProductNotFound(_)
            | AppError::MovementNotFound(_)
            | AppError::SaleNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoActiveSubscription { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::PlanLimitExceeded { .. } | AppError::OutOfScope { .. } => {
                StatusCode::FORBIDDEN
            }
            AppError::InvalidHierarchy { .. } | AppError::InvalidProduct { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::InsufficientStock { .. }
            | AppError::AlreadyReversed { .. }
            | AppError::OverlappingSubscription { .. } => StatusCode::CONFLICT,
            AppError::InvalidQuantity { .. }
            | AppError::InvalidWindow { .. }
            | AppError::MissingField(_)
            | AppError::InvalidField { .. }
            | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::TransientFailure(_) | AppError::ConflictAborted(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match &self {
            // Retorna todos os detalhes da validação, campo a campo.
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors
                        .iter()
                        .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                json!({
                    "error": "Um ou mais campos são inválidos.",
                    "code": code,
                    "details": details,
                })
            }
            AppError::InsufficientStock { shortages } => json!({
                "error": self.to_string(),
                "code": code,
                "details": shortages,
            }),
            // Erros internos não vazam detalhes; o `tracing` guarda a mensagem completa.
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => {
                tracing::error!("Erro Interno do Servidor: {}", self);
                json!({ "error": "Ocorreu um erro inesperado.", "code": code })
            }
            _ => json!({ "error": self.to_string(), "code": code }),
        };

        (status, Json(body)).into_response()
    }
}
