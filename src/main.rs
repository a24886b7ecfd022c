use std::sync::Arc;

use courier_slips::api;
use courier_slips::config::Config;
use courier_slips::error::AppError;
use courier_slips::state::AppState;
use courier_slips::store::{MemoryStore, PgStore, Store};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            Arc::new(PgStore::connect(url, config.database_max_connections).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; couriers and slips live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    tracing::info!(
        store = store.name(),
        overflow_policy = %config.overflow_policy,
        "store ready"
    );

    let shared_state = Arc::new(AppState::new(
        store,
        config.event_buffer_size,
        config.overflow_policy,
    ));

    let app = api::rest::router(shared_state, &config.static_dir);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
