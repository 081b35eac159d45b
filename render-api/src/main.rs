use std::sync::Arc;

use render_api::config::AppConfig;
use render_api::events::EventBus;
use render_api::{build_router, AppState};
use render_shared::clients::db::create_pool;
use render_shared::clients::enhancer::EnhancerClient;
use render_shared::clients::storage::LocalStorage;
use render_shared::middleware::{init_metrics, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("render-api");

    let config = AppConfig::load()?;
    let port = config.port;

    let db = create_pool(&config.database_url, config.db_pool_size, config.db_pool_timeout())?;

    let storage = LocalStorage::new(&config.upload_dir, &config.public_prefix);
    storage.ensure_layout().await?;

    let enhancer = EnhancerClient::new(&config.enhancer_url, config.enhancer_timeout())?;
    let events = EventBus::with_capacity(config.chat_event_capacity);
    let metrics_handle = init_metrics()?;

    let state = Arc::new(AppState { db, config, storage, enhancer, events, metrics_handle });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "render-api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("render-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
