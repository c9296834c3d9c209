// src/services/sale_service.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    common::{
        error::AppError,
        retry::RetryPolicy,
    },
    db::{Store, StoreTx},
    models::{
        inventory::{MovementEntry, MovementKind, StockKey, StockMovement},
        sales::{LineItem, Sale, SaleState},
    },
    services::{
        events::{spawn_receipt_upload, AuditEvent, AuditSink, ReceiptStore},
        ledger_service::{resolve_product, LedgerService},
        subscription_service::SubscriptionService,
        tenancy_service::root_in,
    },
};

/// Tipos de movimentação que podem ser lançados fora de uma venda.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockChangeKind {
    Restock,
    Adjustment,
    Override,
}

impl From<StockChangeKind> for MovementKind {
    fn from(kind: StockChangeKind) -> Self {
        match kind {
            StockChangeKind::Restock => MovementKind::Restock,
            StockChangeKind::Adjustment => MovementKind::Adjustment,
            StockChangeKind::Override => MovementKind::Override,
        }
    }
}

/// Uma linha de reposição/ajuste: delta assinado para o produto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLine {
    pub product_id: Uuid,
    pub delta: i64,
}

/// As duas pernas de uma transferência entre filiais.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: Uuid,
    pub outgoing: StockMovement,
    pub incoming: StockMovement,
}

/// Coordenador: Gate + Ledger + gravação da venda, tudo numa transação.
#[derive(Clone)]
pub struct SaleService {
    store: Arc<dyn Store>,
    gate: SubscriptionService,
    ledger: LedgerService,
    audit: Arc<dyn AuditSink>,
    receipts: Arc<dyn ReceiptStore>,
    retry: RetryPolicy,
}

impl SaleService {
    pub fn new(
        store: Arc<dyn Store>,
        gate: SubscriptionService,
        ledger: LedgerService,
        audit: Arc<dyn AuditSink>,
        receipts: Arc<dyn ReceiptStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            gate,
            ledger,
            audit,
            receipts,
            retry,
        }
    }

    // ---
    // Vendas
    // ---

    /// Registra a venda: uma movimentação `Sale` por linha física, tudo ou nada.
    pub async fn commit_sale(
        &self,
        branch_id: Uuid,
        lines: Vec<LineItem>,
        at: DateTime<Utc>,
    ) -> Result<Sale, AppError> {
        if lines.is_empty() {
            return Err(AppError::MissingField("items"));
        }
        for line in &lines {
            line.validate()?;
        }
        Sale::total_of(&lines)?;

        let mut state = SaleState::Pending;

        // 1. Autorização de entrada (pode vir do cache)
        if let Err(e) = self.gate.authorize(branch_id, at).await {
            state.transition(SaleState::Rejected)?;
            self.audit.record(AuditEvent::SaleRejected {
                branch_id,
                code: e.code(),
                reason: e.to_string(),
            });
            return Err(e);
        }
        state = state.transition(SaleState::Authorized)?;

        // 2. Transação com revalidação, retentada em falhas transitórias
        let sale_id = Uuid::new_v4();
        let lines = &lines;
        let result = self
            .retry
            .run("commit_sale", || self.try_commit_sale(sale_id, branch_id, lines, at))
            .await;

        match result {
            Ok(sale) => {
                state.transition(SaleState::Committed)?;
                let keys: Vec<StockKey> = lines
                    .iter()
                    .map(|l| StockKey::new(branch_id, l.product_id))
                    .collect();
                self.ledger.forget(&keys).await;

                tracing::info!(
                    sale_id = %sale.id,
                    branch_id = %branch_id,
                    total = %sale.total_amount,
                    "Venda registrada com {} itens",
                    sale.items.len()
                );
                self.audit.record(AuditEvent::SaleCommitted {
                    sale_id: sale.id,
                    branch_id,
                    total_amount: sale.total_amount,
                    lines: sale.items.len(),
                });
                spawn_receipt_upload(Arc::clone(&self.receipts), sale.clone());
                Ok(sale)
            }
            Err(e) => {
                state.transition(SaleState::Aborted)?;
                tracing::warn!(branch_id = %branch_id, "Venda abortada: {}", e);
                self.audit.record(AuditEvent::SaleAborted {
                    branch_id,
                    code: e.code(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_commit_sale(
        &self,
        sale_id: Uuid,
        branch_id: Uuid,
        lines: &[LineItem],
        at: DateTime<Utc>,
    ) -> Result<Sale, AppError> {
        let mut tx = self.store.begin().await?;
        let sale = self.sale_in(&mut *tx, sale_id, branch_id, lines, at).await?;
        tx.commit().await?;
        Ok(sale)
    }

    async fn sale_in(
        &self,
        tx: &mut dyn StoreTx,
        sale_id: Uuid,
        branch_id: Uuid,
        lines: &[LineItem],
        at: DateTime<Utc>,
    ) -> Result<Sale, AppError> {
        // 1. Revalida o Gate sem cache (segura cancelamentos até o commit)
        self.gate.authorize_in_tx(tx, branch_id, at).await?;

        // 2. Separa linhas físicas de serviços
        let mut owners = HashMap::new();
        let mut entries = Vec::new();
        let mut entry_lines = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let product = resolve_product(tx, &mut owners, branch_id, line.product_id, idx).await?;
            if product.is_service {
                continue;
            }
            entries.push(MovementEntry::new(
                branch_id,
                line.product_id,
                -line.quantity,
                MovementKind::Sale,
                sale_id,
            ));
            entry_lines.push(idx);
        }

        // 3. Livro-razão (índices de erro voltam para as linhas da venda)
        let movements = self
            .ledger
            .append_in(tx, &entries)
            .await
            .map_err(|e| remap_lines(e, &entry_lines))?;

        let mut movement_ids = vec![None; lines.len()];
        for (movement, idx) in movements.iter().zip(&entry_lines) {
            movement_ids[*idx] = Some(movement.id);
        }

        // 4. Venda e itens
        let sale = Sale::assemble(sale_id, branch_id, at, lines, &movement_ids)?;
        tx.insert_sale(&sale).await?;
        Ok(sale)
    }

    pub async fn find_sale(&self, sale_id: Uuid) -> Result<Sale, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_sale(sale_id)
            .await?
            .ok_or(AppError::SaleNotFound(sale_id))
    }

    // ---
    // Reposição, ajustes e overrides
    // ---

    /// Lança reposições/ajustes pelo mesmo caminho Gate + Ledger das vendas.
    pub async fn commit_stock_change(
        &self,
        branch_id: Uuid,
        lines: Vec<StockLine>,
        kind: StockChangeKind,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Vec<StockMovement>, AppError> {
        if lines.is_empty() {
            return Err(AppError::MissingField("lines"));
        }

        self.gate.authorize(branch_id, at).await?;

        let txn_ref = Uuid::new_v4();
        let kind = MovementKind::from(kind);
        let entries: Vec<MovementEntry> = lines
            .iter()
            .map(|l| {
                MovementEntry::new(branch_id, l.product_id, l.delta, kind, txn_ref).with_notes(notes.clone())
            })
            .collect();
        let entries = &entries;

        let movements = self
            .retry
            .run("commit_stock_change", || async move {
                let mut tx = self.store.begin().await?;
                self.gate.authorize_in_tx(&mut *tx, branch_id, at).await?;
                let movements = self.ledger.append_in(&mut *tx, entries).await?;
                tx.commit().await?;
                Ok::<_, AppError>(movements)
            })
            .await?;

        let keys: Vec<StockKey> = movements.iter().map(StockMovement::key).collect();
        self.ledger.forget(&keys).await;
        tracing::info!(
            branch_id = %branch_id,
            txn_ref = %txn_ref,
            "{} movimentações {} lançadas",
            movements.len(),
            kind
        );
        self.audit.record(AuditEvent::StockChanged {
            branch_id,
            kind,
            txn_ref,
            movements: movements.len(),
        });
        Ok(movements)
    }

    /// Move `quantity` unidades entre duas filiais do mesmo negócio.
    pub async fn transfer(
        &self,
        from_branch_id: Uuid,
        to_branch_id: Uuid,
        product_id: Uuid,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<Transfer, AppError> {
        if quantity <= 0 {
            return Err(AppError::InvalidQuantity {
                product_id,
                quantity,
                reason: "a quantidade transferida precisa ser positiva".into(),
            });
        }
        if from_branch_id == to_branch_id {
            return Err(AppError::InvalidHierarchy {
                tenant_id: from_branch_id,
                reason: "origem e destino são a mesma filial".into(),
            });
        }

        self.gate.authorize(from_branch_id, at).await?;
        self.gate.authorize(to_branch_id, at).await?;

        let transfer_id = Uuid::new_v4();
        let entries = [
            MovementEntry::new(from_branch_id, product_id, -quantity, MovementKind::TransferOut, transfer_id),
            MovementEntry::new(to_branch_id, product_id, quantity, MovementKind::TransferIn, transfer_id),
        ];
        let entries = &entries;

        let mut movements = self
            .retry
            .run("transfer", || async move {
                let mut tx = self.store.begin().await?;

                // 1. Mesmo negócio (mesma raiz)
                let from_root = root_in(&mut *tx, from_branch_id).await?;
                let to_root = root_in(&mut *tx, to_branch_id).await?;
                if from_root.id != to_root.id {
                    return Err(AppError::OutOfScope {
                        scope_tenant_id: from_root.id,
                        tenant_id: to_branch_id,
                    });
                }

                // 2. Revalida as duas filiais em ordem fixa
                let mut branches = [from_branch_id, to_branch_id];
                branches.sort();
                for branch_id in branches {
                    self.gate.authorize_in_tx(&mut *tx, branch_id, at).await?;
                }

                let movements = self.ledger.append_in(&mut *tx, entries).await?;
                tx.commit().await?;
                Ok::<_, AppError>(movements)
            })
            .await?;

        let keys: Vec<StockKey> = movements.iter().map(StockMovement::key).collect();
        self.ledger.forget(&keys).await;

        let incoming = movements.pop();
        let outgoing = movements.pop();
        let (Some(outgoing), Some(incoming)) = (outgoing, incoming) else {
            return Err(AppError::InternalServerError(anyhow::anyhow!(
                "Transferência {transfer_id} sem as duas pernas"
            )));
        };

        tracing::info!(
            transfer_id = %transfer_id,
            from = %from_branch_id,
            to = %to_branch_id,
            product_id = %product_id,
            quantity,
            "Transferência concluída"
        );
        self.audit.record(AuditEvent::TransferCommitted {
            transfer_id,
            from_branch_id,
            to_branch_id,
            product_id,
            quantity,
        });

        Ok(Transfer {
            id: transfer_id,
            outgoing,
            incoming,
        })
    }

    /// Estorno com Gate: a filial da movimentação precisa estar autorizada.
    pub async fn reverse_movement(&self, movement_id: Uuid, at: DateTime<Utc>) -> Result<StockMovement, AppError> {
        let original = self.ledger.find_movement(movement_id).await?;
        let branch_id = original.branch_id;

        self.gate.authorize(branch_id, at).await?;

        let txn_ref = Uuid::new_v4();
        let reversal = self
            .retry
            .run("reverse_movement", || async move {
                let mut tx = self.store.begin().await?;
                self.gate.authorize_in_tx(&mut *tx, branch_id, at).await?;
                let reversal = self.ledger.reverse_in(&mut *tx, movement_id, txn_ref).await?;
                tx.commit().await?;
                Ok::<_, AppError>(reversal)
            })
            .await?;

        self.ledger.forget(&[reversal.key()]).await;
        self.audit.record(AuditEvent::MovementReversed {
            movement_id,
            reversal_id: reversal.id,
        });
        Ok(reversal)
    }
}

/// Converte índices do lote do livro-razão em índices das linhas da venda.
fn remap_lines(err: AppError, entry_lines: &[usize]) -> AppError {
    let to_sale_line = |line: usize| entry_lines.get(line).copied().unwrap_or(line);

    match err {
        AppError::InsufficientStock { mut shortages } => {
            for shortage in &mut shortages {
                shortage.line = to_sale_line(shortage.line);
            }
            AppError::InsufficientStock { shortages }
        }
        AppError::InvalidProduct {
            branch_id,
            product_id,
            line,
            reason,
        } => AppError::InvalidProduct {
            branch_id,
            product_id,
            line: line.map(to_sale_line),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::StockShortage;

    #[test]
    fn shortage_lines_point_at_sale_lines() {
        // Linha 0 da venda é serviço; as entradas do lote são as linhas 1 e 2
        let err = AppError::InsufficientStock {
            shortages: vec![StockShortage {
                line: 1,
                branch_id: Uuid::nil(),
                product_id: Uuid::nil(),
                available: 0,
                requested: 4,
            }],
        };

        match remap_lines(err, &[1, 2]) {
            AppError::InsufficientStock { shortages } => assert_eq!(shortages[0].line, 2),
            other => panic!("erro inesperado: {other:?}"),
        }
    }

    #[test]
    fn only_stock_change_kinds_convert() {
        assert_eq!(MovementKind::from(StockChangeKind::Override), MovementKind::Override);
        assert_eq!(MovementKind::from(StockChangeKind::Restock), MovementKind::Restock);
    }
}
