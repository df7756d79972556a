mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::Result;

use services::{Broadcaster, ReceiptStorage};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting repair desk backend"
    );

    let pool = db::create_pool(&settings).await?;
    db::run_migrations(&pool).await?;

    let broadcaster = Broadcaster::new(&settings.redis_url).await?;

    let storage = ReceiptStorage::new(
        settings.receipt_upload_dir.clone(),
        settings.receipt_public_base_url.clone(),
        settings.receipt_max_bytes,
    );

    let http_client = reqwest::Client::builder()
        .user_agent(concat!("repairdesk-backend/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let jwks_cache = auth::JwksCache::new(
        http_client,
        settings.jwt_jwks_url.clone(),
        settings.jwt_issuer.clone(),
        settings.jwt_audience.clone(),
        settings.jwks_cache_ttl_seconds,
    );

    if let Err(e) = jwks_cache.warm_cache().await {
        tracing::warn!(error = %e, "Failed to warm JWKS cache - will fetch on first request");
    }

    let state = app::AppState::new(pool, settings.clone(), jwks_cache, broadcaster, storage);

    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
