// src/services/product_service.rs

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::Store,
    models::inventory::{NewProduct, Product},
};

#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn Store>,
}

impl ProductService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Cadastra um produto do tenant. Filiais abaixo dele também podem usá-lo.
    pub async fn create_product(&self, tenant_id: Uuid, attrs: NewProduct) -> Result<Product, AppError> {
        let product = Product::new(tenant_id, attrs)?;

        let mut tx = self.store.begin().await?;
        if tx.find_tenant(tenant_id).await?.is_none() {
            return Err(AppError::TenantNotFound(tenant_id));
        }
        tx.insert_product(&product).await?;
        tx.commit().await?;

        tracing::info!(
            product_id = %product.id,
            tenant_id = %tenant_id,
            "Produto cadastrado: {} ({})",
            product.name,
            product.sku
        );
        Ok(product)
    }

    pub async fn find(&self, product_id: Uuid) -> Result<Product, AppError> {
        let mut tx = self.store.begin().await?;
        tx.find_product(product_id)
            .await?
            .ok_or(AppError::ProductNotFound(product_id))
    }
}
