use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use query_catalog_backend::api;
use query_catalog_backend::config::Config;
use query_catalog_backend::models::Catalog;
use query_catalog_backend::services::database::DriverConnector;
use query_catalog_backend::services::{ConnectionCache, QueryEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let catalog = Catalog::load_from_path(&config.catalog.path).map_err(|e| {
        error!("Failed to load catalog: {}", e);
        e
    })?;
    info!(
        "Catalog ready: {} queries for roles {:?}",
        catalog.len(),
        catalog.roles()
    );

    if config.relational.uri.is_none() {
        info!("PG_URI not set; relational queries will be unavailable");
    }
    if config.document.uri.is_none() {
        info!("MONGO_URI not set; document queries will be unavailable");
    }

    let connector = Arc::new(DriverConnector::new(config.relational.max_pool_size));
    let connections = Arc::new(ConnectionCache::new(connector));
    let engine = Arc::new(QueryEngine::new(catalog, connections, config.engine_options()));

    let app = api::create_router(engine);

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .with_context(|| format!("Invalid server address {}", config.server_address()))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
