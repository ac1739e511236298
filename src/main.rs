//! Tenant Notes API server
//!
//! Usage:
//!   cargo run --bin seed            # demo tenants acme/globex and users
//!   cargo run --bin tenant_notes    # start server (PORT, default 5000)
//!
//! Configuration is read from the environment and an optional `.env` file.

use std::net::SocketAddr;

use chrono::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use tenant_notes::auth::JwtKeys;
use tenant_notes::config::Config;
use tenant_notes::logging;
use tenant_notes::rest::{create_router, AppState};
use tenant_notes::storage::Storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let _log_guard = logging::init(&config.log)?;

    if config.uses_dev_secret() {
        warn!("JWT_SECRET is not set; using the development secret");
    }

    let addr = config.bind_addr()?;
    let storage = Storage::open(&config.database_path)?;
    info!(path = %config.database_path, "storage opened");

    let state = AppState::new(
        storage.clone(),
        JwtKeys::new(config.jwt_secret.as_bytes(), Duration::hours(config.jwt_ttl_hours)),
        config.cors_origins.clone(),
        config.rate_limit.clone(),
    );
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        rate_limit = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window.as_secs(),
        "tenant notes API listening"
    );
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    storage.flush()?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
