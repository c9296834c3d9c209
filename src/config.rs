// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    common::retry::RetryPolicy,
    db::Store,
    services::{
        AuditSink, LedgerService, ProductService, ReceiptStore, SaleService, SubscriptionService,
        TenantService,
    },
};

const AUDIT_CHANNEL_CAPACITY: usize = 1_024;

/// Configuração lida do ambiente (e do `.env`, se existir).
#[derive(Debug, Clone)]
pub struct AppConfig {
    // None = roda com o store em memória
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub auth_cache_ttl: Duration,
    pub balance_cache_ttl: Duration,
    pub commit_max_attempts: u32,
    pub commit_retry_base: Duration,
    pub audit_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            db_max_connections: 5,
            db_acquire_timeout: Duration::from_secs(3),
            auth_cache_ttl: Duration::from_secs(30),
            balance_cache_ttl: Duration::from_secs(60),
            commit_max_attempts: 3,
            commit_retry_base: Duration::from_millis(25),
            audit_channel_capacity: AUDIT_CHANNEL_CAPACITY,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_acquire_timeout: Duration::from_secs(parse_var(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.db_acquire_timeout.as_secs(),
            )?),
            auth_cache_ttl: Duration::from_secs(parse_var(
                "AUTH_CACHE_TTL_SECS",
                defaults.auth_cache_ttl.as_secs(),
            )?),
            balance_cache_ttl: Duration::from_secs(parse_var(
                "BALANCE_CACHE_TTL_SECS",
                defaults.balance_cache_ttl.as_secs(),
            )?),
            commit_max_attempts: parse_var("COMMIT_MAX_ATTEMPTS", defaults.commit_max_attempts)?,
            commit_retry_base: Duration::from_millis(parse_var(
                "COMMIT_RETRY_BASE_MS",
                defaults.commit_retry_base.as_millis() as u64,
            )?),
            audit_channel_capacity: defaults.audit_channel_capacity,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.commit_max_attempts, self.commit_retry_base)
    }

    /// Conecta ao Postgres. Só faz sentido com `database_url` definida.
    pub async fn connect_pool(&self) -> anyhow::Result<PgPool> {
        let database_url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL deve ser definida")?;

        let pool = PgPoolOptions::new()
            .max_connections(self.db_max_connections)
            .acquire_timeout(self.db_acquire_timeout)
            .connect(database_url)
            .await
            .context("Falha ao conectar ao banco de dados")?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");
        Ok(pool)
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// O estado compartilhado entre os handlers.
#[derive(Clone)]
pub struct AppState {
    pub tenant_service: TenantService,
    pub subscription_service: SubscriptionService,
    pub product_service: ProductService,
    pub ledger_service: LedgerService,
    pub sale_service: SaleService,
}

impl AppState {
    /// Monta o gráfico de dependências sobre um store qualquer.
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditSink>,
        receipts: Arc<dyn ReceiptStore>,
    ) -> Self {
        let subscription_service =
            SubscriptionService::new(Arc::clone(&store), Arc::clone(&audit), config.auth_cache_ttl);
        let product_service = ProductService::new(Arc::clone(&store));
        let ledger_service = LedgerService::new(Arc::clone(&store), config.balance_cache_ttl);
        let tenant_service = TenantService::new(Arc::clone(&store), Arc::clone(&audit))
            .with_removal_hook(Arc::new(subscription_service.clone()))
            .with_removal_hook(Arc::new(ledger_service.clone()));
        let sale_service = SaleService::new(
            store,
            subscription_service.clone(),
            ledger_service.clone(),
            audit,
            receipts,
            config.retry_policy(),
        );

        Self {
            tenant_service,
            subscription_service,
            product_service,
            ledger_service,
            sale_service,
        }
    }
}
