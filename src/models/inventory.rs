// src/models/inventory.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::error::AppError;

// --- 1. Produtos ---
// Serviços nunca carregam estoque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub is_service: bool,
    pub base_cost: Decimal,
    pub sale_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub is_service: bool,
    #[serde(default)]
    pub base_cost: Decimal,
    pub sale_price: Option<Decimal>,
}

impl Product {
    pub fn new(tenant_id: Uuid, attrs: NewProduct) -> Result<Self, AppError> {
        let sku = attrs.sku.trim();
        let name = attrs.name.trim();
        if sku.is_empty() {
            return Err(AppError::MissingField("sku"));
        }
        if name.is_empty() {
            return Err(AppError::MissingField("name"));
        }
        if attrs.base_cost.is_sign_negative() {
            return Err(AppError::InvalidField {
                field: "baseCost",
                reason: "o custo não pode ser negativo".into(),
            });
        }
        if attrs.sale_price.is_some_and(|p| p.is_sign_negative()) {
            return Err(AppError::InvalidField {
                field: "salePrice",
                reason: "o preço de venda não pode ser negativo".into(),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            sku: sku.to_string(),
            name: name.to_string(),
            is_service: attrs.is_service,
            base_cost: attrs.base_cost,
            sale_price: attrs.sale_price,
            created_at: now,
            updated_at: now,
        })
    }
}

// --- 2. Tipos de movimentação ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Sale,        // "SALE": sempre negativo
    Restock,     // "RESTOCK": sempre positivo
    Adjustment,  // "ADJUSTMENT": correções e estornos
    TransferOut, // "TRANSFER_OUT": saída para outra filial
    TransferIn,  // "TRANSFER_IN": entrada vinda de outra filial
    Override,    // "OVERRIDE": ajuste que pode deixar o saldo negativo (encomendas)
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Sale => "SALE",
            MovementKind::Restock => "RESTOCK",
            MovementKind::Adjustment => "ADJUSTMENT",
            MovementKind::TransferOut => "TRANSFER_OUT",
            MovementKind::TransferIn => "TRANSFER_IN",
            MovementKind::Override => "OVERRIDE",
        }
    }

    /// O sinal do delta precisa bater com o tipo.
    pub fn accepts(self, delta: i64) -> bool {
        match self {
            MovementKind::Sale | MovementKind::TransferOut => delta < 0,
            MovementKind::Restock | MovementKind::TransferIn => delta > 0,
            MovementKind::Adjustment | MovementKind::Override => delta != 0,
        }
    }

    pub fn allows_negative_balance(self) -> bool {
        self == MovementKind::Override
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SALE" => Ok(MovementKind::Sale),
            "RESTOCK" => Ok(MovementKind::Restock),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            "TRANSFER_OUT" => Ok(MovementKind::TransferOut),
            "TRANSFER_IN" => Ok(MovementKind::TransferIn),
            "OVERRIDE" => Ok(MovementKind::Override),
            other => Err(AppError::InternalServerError(anyhow::anyhow!(
                "Tipo de movimentação desconhecido: {other}"
            ))),
        }
    }
}

// Chave do saldo: (filial, produto)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub branch_id: Uuid,
    pub product_id: Uuid,
}

impl StockKey {
    pub fn new(branch_id: Uuid, product_id: Uuid) -> Self {
        Self {
            branch_id,
            product_id,
        }
    }
}

// --- 3. Pedido de movimentação (entrada do livro-razão) ---
#[derive(Debug, Clone, PartialEq)]
pub struct MovementEntry {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub delta: i64,
    pub kind: MovementKind,
    pub txn_ref: Uuid,
    pub reverses: Option<Uuid>,
    pub notes: Option<String>,
}

impl MovementEntry {
    pub fn new(branch_id: Uuid, product_id: Uuid, delta: i64, kind: MovementKind, txn_ref: Uuid) -> Self {
        Self {
            branch_id,
            product_id,
            delta,
            kind,
            txn_ref,
            reverses: None,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.branch_id, self.product_id)
    }
}

// --- 4. Movimentação de estoque (livro-razão, imutável) ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub delta: i64,
    pub kind: MovementKind,
    pub txn_ref: Uuid,
    pub reverses: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(entry: MovementEntry) -> Result<Self, AppError> {
        if !entry.kind.accepts(entry.delta) {
            return Err(AppError::InvalidQuantity {
                product_id: entry.product_id,
                quantity: entry.delta,
                reason: format!("delta incompatível com o tipo {}", entry.kind),
            });
        }
        // Sem simétrico em i64: estornar seria impossível
        if entry.delta == i64::MIN {
            return Err(AppError::InvalidQuantity {
                product_id: entry.product_id,
                quantity: entry.delta,
                reason: "delta fora do intervalo suportado".into(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            branch_id: entry.branch_id,
            product_id: entry.product_id,
            delta: entry.delta,
            kind: entry.kind,
            txn_ref: entry.txn_ref,
            reverses: entry.reverses,
            notes: entry.notes,
            created_at: Utc::now(),
        })
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.branch_id, self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sale_must_be_negative() {
        let entry = MovementEntry::new(Uuid::new_v4(), Uuid::new_v4(), 3, MovementKind::Sale, Uuid::new_v4());
        assert!(matches!(
            StockMovement::new(entry),
            Err(AppError::InvalidQuantity { quantity: 3, .. })
        ));
    }

    #[test]
    fn zero_delta_is_never_accepted() {
        for kind in [
            MovementKind::Sale,
            MovementKind::Restock,
            MovementKind::Adjustment,
            MovementKind::TransferIn,
            MovementKind::TransferOut,
            MovementKind::Override,
        ] {
            assert!(!kind.accepts(0), "{kind} aceitou delta zero");
        }
    }

    #[test]
    fn only_override_allows_negative_balance() {
        assert!(MovementKind::Override.allows_negative_balance());
        assert!(!MovementKind::Adjustment.allows_negative_balance());
    }

    #[test]
    fn kind_text_matches_serde() {
        let json = serde_json::to_string(&MovementKind::TransferOut).unwrap();
        assert_eq!(json, "\"TRANSFER_OUT\"");
        assert_eq!("TRANSFER_OUT".parse::<MovementKind>().unwrap(), MovementKind::TransferOut);
    }

    #[test]
    fn service_product_needs_sku() {
        let err = Product::new(
            Uuid::new_v4(),
            NewProduct {
                sku: "".into(),
                name: "Corte de cabelo".into(),
                is_service: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::MissingField("sku")));
    }

    #[test]
    fn negative_prices_name_the_invalid_field() {
        let err = Product::new(
            Uuid::new_v4(),
            NewProduct {
                sku: "CAF-01".into(),
                name: "Café".into(),
                base_cost: Decimal::new(-1, 0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidField { field: "baseCost", .. }));

        let err = Product::new(
            Uuid::new_v4(),
            NewProduct {
                sku: "CAF-01".into(),
                name: "Café".into(),
                sale_price: Some(Decimal::new(-250, 2)),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidField { field: "salePrice", .. }));
        assert_eq!(err.code(), "INVALID_FIELD");
    }
}
