//! Door lock bridge - HTTP and WebSocket API over a Home Assistant host

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doorlock_core::LockManager;

mod api;
mod config;
mod ha_transport;
mod websocket;

use api::AppState;
use config::Config;
use ha_transport::HaTransport;

/// Bound on a single HTTP call to the host; the retry loop applies its own
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doorlock_api=debug,doorlock_core=debug,info".into()),
        )
        .init();

    tracing::info!("Starting door lock bridge");

    let config = Config::from_env()?;
    tracing::info!("Using Home Assistant at {}", config.ha_url);

    let transport = HaTransport::new(config.ha_url.clone(), config.ha_token.clone(), HTTP_TIMEOUT)?;
    let manager = LockManager::start(Arc::new(transport), config.manager.clone()).await;

    for (ieee, hints) in &config.devices {
        match manager.register_device(ieee, hints.clone()) {
            Ok(device) => tracing::info!("Configured lock {}", device.display_name()),
            Err(e) => tracing::warn!("Skipping configured lock {}: {}", ieee, e),
        }
    }
    tracing::info!("{} lock(s) registered", manager.devices().len());

    let app = api::router(AppState {
        manager: Arc::clone(&manager),
    });

    tracing::info!("Listening on http://{}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    manager.shutdown();
    if let Err(e) = manager.save().await {
        tracing::warn!("Failed to save locks on shutdown: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
