use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use cloakgate_core::store::{KeyValueStore, MemoryStore};
use cloakgate_redis::RedisStore;
use cloakgate_server::{app, shutdown, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Structured JSON logging; level via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cloakgate=info".parse()?),
        )
        .json()
        .init();

    // Invalid configuration aborts here, before anything binds or connects.
    let config = cloakgate_core::config::Config::from_env()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = format!("{}/cloakgate.db", config.data_dir);
    let db = cloakgate_duckdb::DuckDbBackend::open(&db_path)?;

    // Shared store: Redis when configured, in-process otherwise. An
    // unreachable Redis at bootstrap is a startup failure (non-zero exit);
    // runtime errors later degrade to cache misses instead.
    let kv: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => {
            info!("CLOAKGATE_REDIS_URL not set; using in-process store");
            Arc::new(MemoryStore::new())
        }
    };

    let port = config.port;
    let grace = std::time::Duration::from_secs(config.shutdown_grace_seconds);
    let state = Arc::new(AppState::new(config, db, kv));

    // Prime the blacklist hot set before accepting traffic, then keep it
    // fresh in the background.
    match state.blacklist.refresh().await {
        Ok(count) => info!(count, "blacklist hot set primed"),
        Err(e) => tracing::warn!(error = %e, "initial blacklist refresh failed, starting empty"),
    }
    state.spawn_background();

    let addr = format!("0.0.0.0:{port}");
    let router = app::build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(port, "cloakgate listening on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::shutdown_signal())
    .await?;

    // Orderly drain: stop accepting, flush what the sink still holds.
    state.sink.shutdown(grace).await;
    info!("shutdown complete");
    Ok(())
}
