// src/models/subscription.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::error::AppError;

// ---
// 1. Plano de Assinatura
// ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    // None = filiais ilimitadas
    pub max_active_branches: Option<i32>,
    // None = o plano não expira
    pub duration_days: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlan {
    pub name: String,
    pub max_active_branches: Option<i32>,
    pub duration_days: Option<i32>,
}

impl SubscriptionPlan {
    pub fn new(attrs: NewPlan) -> Result<Self, AppError> {
        let name = attrs.name.trim();
        if name.is_empty() {
            return Err(AppError::MissingField("name"));
        }
        if attrs.max_active_branches.is_some_and(|n| n < 1) {
            return Err(AppError::InvalidField {
                field: "maxActiveBranches",
                reason: "o limite de filiais deve ser ao menos 1".into(),
            });
        }
        if attrs.duration_days.is_some_and(|d| d < 1) {
            return Err(AppError::InvalidField {
                field: "durationDays",
                reason: "a duração deve ser de ao menos 1 dia".into(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            max_active_branches: attrs.max_active_branches,
            duration_days: attrs.duration_days,
            created_at: Utc::now(),
        })
    }

    /// Fim padrão de uma assinatura que começa em `starts_at`.
    pub fn default_end(&self, starts_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration_days
            .map(|days| starts_at + Duration::days(i64::from(days)))
    }
}

// ---
// 2. Assinatura de uma filial
// ---
// Janela semiaberta [starts_at, ends_at); ends_at None = sem fim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBranchSubscription {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub plan_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ActiveBranchSubscription {
    pub fn new(
        branch_id: Uuid,
        plan_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Result<Self, AppError> {
        if let Some(end) = ends_at {
            if end <= starts_at {
                return Err(AppError::InvalidWindow {
                    starts_at,
                    ends_at: end,
                });
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            branch_id,
            plan_id,
            starts_at,
            ends_at,
            created_at: Utc::now(),
        })
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && self.ends_at.is_none_or(|end| at < end)
    }

    pub fn overlaps(&self, starts_at: DateTime<Utc>, ends_at: Option<DateTime<Utc>>) -> bool {
        let starts_before_other_ends = ends_at.is_none_or(|end| self.starts_at < end);
        let other_starts_before_self_ends = self.ends_at.is_none_or(|end| starts_at < end);
        starts_before_other_ends && other_starts_before_self_ends
    }
}

// ---
// 3. Autorização (resultado do Gate)
// ---
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub branch_id: Uuid,
    // None para tenants raiz (sempre autorizados)
    pub subscription: Option<ActiveBranchSubscription>,
    pub authorized_at: DateTime<Utc>,
}

impl Authorization {
    pub fn root(branch_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            branch_id,
            subscription: None,
            authorized_at: at,
        }
    }

    pub fn for_subscription(subscription: ActiveBranchSubscription, at: DateTime<Utc>) -> Self {
        Self {
            branch_id: subscription.branch_id,
            subscription: Some(subscription),
            authorized_at: at,
        }
    }

    /// Uma autorização em cache só vale para instantes dentro da janela da assinatura.
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        match &self.subscription {
            None => true,
            Some(sub) => sub.covers(at),
        }
    }
}
