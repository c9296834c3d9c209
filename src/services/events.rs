// src/services/events.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{MovementKind, Sale},
};

// ---
// 1. Eventos de auditoria
// ---
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    #[serde(rename_all = "camelCase")]
    SaleCommitted {
        sale_id: Uuid,
        branch_id: Uuid,
        total_amount: Decimal,
        lines: usize,
    },
    #[serde(rename_all = "camelCase")]
    SaleRejected {
        branch_id: Uuid,
        code: &'static str,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    SaleAborted {
        branch_id: Uuid,
        code: &'static str,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    StockChanged {
        branch_id: Uuid,
        kind: MovementKind,
        txn_ref: Uuid,
        movements: usize,
    },
    #[serde(rename_all = "camelCase")]
    TransferCommitted {
        transfer_id: Uuid,
        from_branch_id: Uuid,
        to_branch_id: Uuid,
        product_id: Uuid,
        quantity: i64,
    },
    #[serde(rename_all = "camelCase")]
    MovementReversed {
        movement_id: Uuid,
        reversal_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    AuthorizationGranted {
        branch_id: Uuid,
        at: DateTime<Utc>,
        // true quando a decisão veio do cache de aprovações
        cached: bool,
    },
    #[serde(rename_all = "camelCase")]
    AuthorizationDenied {
        branch_id: Uuid,
        code: &'static str,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionChanged {
        branch_id: Uuid,
        subscription_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    TenantDeleted {
        tenant_id: Uuid,
        removed_tenants: usize,
    },
}

/// Destino dos eventos de auditoria. `record` nunca bloqueia quem chama.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Envia os eventos para um canal limitado; uma task consome e grava no log.
/// Canal cheio = evento descartado (com aviso).
#[derive(Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Precisa ser chamado dentro de um runtime tokio.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "audit", "{}", json),
                    Err(e) => tracing::warn!(target: "audit", "Evento não serializável: {}", e),
                }
            }
        });

        Self { tx }
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("Evento de auditoria descartado: {}", e);
        }
    }
}

// ---
// 2. Comprovantes (armazenamento de objetos)
// ---
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn upload_receipt(&self, sale: &Sale) -> Result<(), AppError>;
}

/// Implementação padrão: só registra o comprovante no log.
#[derive(Clone, Copy, Default)]
pub struct LogReceiptStore;

#[async_trait]
impl ReceiptStore for LogReceiptStore {
    async fn upload_receipt(&self, sale: &Sale) -> Result<(), AppError> {
        tracing::info!(
            sale_id = %sale.id,
            branch_id = %sale.branch_id,
            total = %sale.total_amount,
            "Comprovante gerado ({} itens)",
            sale.items.len()
        );
        Ok(())
    }
}

/// Sobe o comprovante em segundo plano. Falhas só vão para o log.
pub(crate) fn spawn_receipt_upload(receipts: Arc<dyn ReceiptStore>, sale: Sale) {
    tokio::spawn(async move {
        if let Err(e) = receipts.upload_receipt(&sale).await {
            tracing::warn!(sale_id = %sale.id, "Falha ao enviar comprovante: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelAuditSink { tx };
        let event = AuditEvent::MovementReversed {
            movement_id: Uuid::new_v4(),
            reversal_id: Uuid::new_v4(),
        };

        sink.record(event.clone());
        // Segundo envio encontra o canal cheio e retorna na hora
        sink.record(event);
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = AuditEvent::TenantDeleted {
            tenant_id: Uuid::nil(),
            removed_tenants: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "TENANT_DELETED");
        assert_eq!(json["removedTenants"], 3);
    }
}
