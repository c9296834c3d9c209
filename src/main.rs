//src/main.rs

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use branch_ledger::{
    config::{AppConfig, AppState},
    db::{MemoryStore, PgStore, Store},
    routes,
    services::{ChannelAuditSink, LogReceiptStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logger compacto; RUST_LOG controla o nível
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::from_env()?;

    // Sem DATABASE_URL o serviço sobe com o store em memória (uso local)
    let store: Arc<dyn Store> = if config.database_url.is_some() {
        let pool = config.connect_pool().await?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Falha ao rodar as migrações do banco de dados.")?;
        tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

        Arc::new(PgStore::new(pool))
    } else {
        tracing::warn!("DATABASE_URL ausente: usando o store em memória (dados não persistem)");
        Arc::new(MemoryStore::new())
    };

    let audit = Arc::new(ChannelAuditSink::spawn(config.audit_channel_capacity));
    let app_state = AppState::build(&config, store, audit, Arc::new(LogReceiptStore));

    let app = routes::router(app_state);

    // Inicia o servidor
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Falha ao iniciar o listener TCP em {}", config.bind_addr))?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("Erro no servidor Axum")?;
    Ok(())
}
