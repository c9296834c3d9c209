// src/models/tenancy.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::error::AppError;

// ---
// 1. Tenant (O "Estabelecimento" ou a "Filial")
// ---
// Raízes (sem pai) são negócios independentes; filhos são filiais.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parent_tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Atributos informados na criação (raiz ou filial)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTenant {
    pub name: String,
    pub description: Option<String>,
}

impl NewTenant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

impl Tenant {
    /// Cria um negócio independente (sem pai).
    pub fn new_root(attrs: NewTenant) -> Result<Self, AppError> {
        Self::build(None, attrs)
    }

    /// Cria uma filial ligada a `parent_id`. A existência do pai e a ausência
    /// de ciclos são verificadas pelo TenantService, não aqui.
    pub fn new_branch(parent_id: Uuid, attrs: NewTenant) -> Result<Self, AppError> {
        Self::build(Some(parent_id), attrs)
    }

    fn build(parent_tenant_id: Option<Uuid>, attrs: NewTenant) -> Result<Self, AppError> {
        let name = attrs.name.trim();
        if name.is_empty() {
            return Err(AppError::MissingField("name"));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: attrs.description.filter(|d| !d.trim().is_empty()),
            parent_tenant_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_tenant_id.is_none()
    }
}
