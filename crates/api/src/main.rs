use std::sync::Arc;

use anyhow::Context;

use imobcrm_api::app::{build_app, services::AppServices};
use imobcrm_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    imobcrm_observability::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let services = Arc::new(AppServices::from_config(&config).await?);
    let background = services.spawn_background();

    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if services.shutdown(background).await {
        tracing::info!("refresh jobs drained");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
