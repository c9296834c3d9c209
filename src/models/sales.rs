// src/models/sales.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::error::AppError;

// --- Linha pedida pelo cliente ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn new(product_id: Uuid, quantity: i64, unit_price: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.quantity <= 0 {
            return Err(AppError::InvalidQuantity {
                product_id: self.product_id,
                quantity: self.quantity,
                reason: "a quantidade vendida deve ser positiva".into(),
            });
        }
        if self.unit_price.is_sign_negative() {
            return Err(AppError::InvalidQuantity {
                product_id: self.product_id,
                quantity: self.quantity,
                reason: "o preço unitário não pode ser negativo".into(),
            });
        }
        if self.checked_total().is_none() {
            return Err(AppError::InvalidQuantity {
                product_id: self.product_id,
                quantity: self.quantity,
                reason: "o total da linha excede o valor representável".into(),
            });
        }
        Ok(())
    }

    /// `None` quando quantidade × preço estoura o `Decimal`.
    pub fn checked_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

// --- Venda confirmada ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub total_amount: Decimal,
    pub committed_at: DateTime<Utc>,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub id: Uuid,
    pub sale_id: Uuid,
    pub line_no: i32,
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    // None para serviços (não passam pelo livro-razão)
    pub movement_id: Option<Uuid>,
}

impl Sale {
    /// Monta a venda a partir das linhas; `movement_ids[i]` é a movimentação
    /// gerada pela linha `i` (None para serviços).
    pub fn assemble(
        sale_id: Uuid,
        branch_id: Uuid,
        committed_at: DateTime<Utc>,
        lines: &[LineItem],
        movement_ids: &[Option<Uuid>],
    ) -> Result<Self, AppError> {
        let mut items = Vec::with_capacity(lines.len());
        for (idx, (line, movement_id)) in lines.iter().zip(movement_ids).enumerate() {
            items.push(SaleItem {
                id: Uuid::new_v4(),
                sale_id,
                line_no: idx as i32 + 1,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                line_total: line_total(line)?,
                movement_id: *movement_id,
            });
        }

        Ok(Self {
            id: sale_id,
            branch_id,
            total_amount: Self::total_of(lines)?,
            committed_at,
            items,
        })
    }

    /// Soma das linhas; falha se algum total ou a soma estourar.
    pub fn total_of(lines: &[LineItem]) -> Result<Decimal, AppError> {
        let mut total = Decimal::ZERO;
        for line in lines {
            total = total
                .checked_add(line_total(line)?)
                .ok_or_else(|| AppError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    reason: "o total da venda excede o valor representável".into(),
                })?;
        }
        Ok(total)
    }
}

fn line_total(line: &LineItem) -> Result<Decimal, AppError> {
    line.checked_total().ok_or_else(|| AppError::InvalidQuantity {
        product_id: line.product_id,
        quantity: line.quantity,
        reason: "o total da linha excede o valor representável".into(),
    })
}

// ---
// Máquina de estados de uma tentativa de venda
// ---
// Pending -> Authorized -> Committed
// Pending -> Rejected            (terminal)
// Authorized -> Aborted          (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleState {
    Pending,
    Authorized,
    Committed,
    Rejected,
    Aborted,
}

impl SaleState {
    pub fn can_transition_to(self, next: SaleState) -> bool {
        matches!(
            (self, next),
            (SaleState::Pending, SaleState::Authorized)
                | (SaleState::Pending, SaleState::Rejected)
                | (SaleState::Authorized, SaleState::Committed)
                | (SaleState::Authorized, SaleState::Aborted)
        )
    }

    pub fn transition(self, next: SaleState) -> Result<SaleState, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::InternalServerError(anyhow::anyhow!(
                "Transição de venda inválida: {self:?} -> {next:?}"
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SaleState::Committed | SaleState::Rejected | SaleState::Aborted
        )
    }
}
