use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cv_sync::auth::{InMemorySessionRegistry, RedisSessionRegistry, SessionRegistry};
use cv_sync::config::{Config, StorageBackend};
use cv_sync::db::create_pool;
use cv_sync::documents::{DocumentStore, InMemoryDocumentStore, PgDocumentStore};
use cv_sync::routes::build_router;
use cv_sync::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "cv_sync={level},cv_sync_api={level},tower_http={level}",
                level = &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV sync API v{}", env!("CARGO_PKG_VERSION"));

    let documents: Arc<dyn DocumentStore> = match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let pool = create_pool(url, config.database_max_connections).await?;
            Arc::new(PgDocumentStore::new(pool))
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory document store; documents will not survive a restart");
            Arc::new(InMemoryDocumentStore::new())
        }
    };

    let sessions: Arc<dyn SessionRegistry> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            Arc::new(RedisSessionRegistry::connect(&client).await?)
        }
        None => {
            warn!("REDIS_URL not set; using an empty in-process session registry");
            Arc::new(InMemorySessionRegistry::new())
        }
    };

    let state = AppState::new(documents, sessions);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the editor's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
