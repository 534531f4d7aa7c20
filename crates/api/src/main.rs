use std::sync::Arc;

use anyhow::Context;

use licensedesk_api::app::{build_app, AppServices};
use licensedesk_api::config::ApiConfig;
use licensedesk_core::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    licensedesk_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;

    let services = AppServices::from_config(&config.storage, Arc::new(SystemClock))
        .await
        .context("failed to initialize storage")?;

    let app = build_app(config.jwt_secret, services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
