// src/middleware/tenancy.rs

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::common::error::AppError;

// O nome do nosso cabeçalho HTTP customizado
const TENANT_ID_HEADER: &str = "x-tenant-id";

// Escopo de quem chama: o tenant informado no X-Tenant-ID.
// A identidade já foi verificada antes de chegar aqui; o valor é confiável.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext(pub Uuid);

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(TENANT_ID_HEADER)
            .ok_or(AppError::MissingField("X-Tenant-ID"))?;

        // Cabeçalho ilegível ou que não é UUID contam como ausente
        let tenant_id = value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or(AppError::MissingField("X-Tenant-ID"))?;

        Ok(TenantContext(tenant_id))
    }
}
