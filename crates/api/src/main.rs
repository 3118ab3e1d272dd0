use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use labstock_api::app::{build_router, services::AppServices};
use labstock_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    labstock_observability::init_with(&config.log_config());

    let services = Arc::new(
        AppServices::from_config(&config)
            .await
            .context("failed to open the ledger store")?,
    );

    let watcher = config
        .low_stock_interval()
        .map(|every| services.spawn_low_stock_watcher(every));

    let app = build_router(Arc::clone(&services), config.jwt_secret());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, backend = services.backend(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
