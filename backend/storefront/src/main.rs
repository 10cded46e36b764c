//! Project-PDF storefront backend. Entry point.
//!
//! Serves the public storefront API (catalog browsing, order creation,
//! payment verification, PDF download) and the token-guarded admin API
//! (catalog CRUD, order inspection, dashboard) over a single Axum router
//! backed by SQLite.

mod admin;
mod api;
mod assets;
mod auth;
mod catalog;
mod config;
mod db;
mod errors;
mod fulfillment;
mod gateway;
mod mailer;
mod orders;
mod payments;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use payments::OrderLocks;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // Upload directory and bootstrap admin account.
    assets::ensure_dir(&config.upload_dir).await?;
    auth::bootstrap_admin(&pool, &config).await?;

    if config.gateway.is_none() {
        info!("No payment gateway credentials; storefront runs in demo mode");
    }

    // HTTP client shared between the payment gateway and the email API.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let state = Arc::new(api::AppState {
        pool,
        config: config.clone(),
        client,
        locks: OrderLocks::default(),
    });

    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
