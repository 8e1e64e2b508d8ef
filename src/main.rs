//! cors-relay - Entry Point
//!
//! Starts the proxy server with graceful shutdown support.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cors_relay::config::{Config, LogConfig};
use cors_relay::error;
use cors_relay::proxy::ProxyServer;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log);

    info!("Starting cors-relay");
    info!(
        identity = %config.proxy.identity,
        strip_headers = ?config.proxy.strip_headers,
        connect_timeout_secs = config.proxy.connect_timeout,
        max_redirects = config.proxy.max_redirects,
        "Configuration loaded"
    );

    let proxy_server = ProxyServer::new(config.proxy.clone())?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(shutdown_rx).await {
            error!("Proxy server error: {}", e);
        }
    });

    info!("Server started - Proxy: {}", config.proxy_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = proxy_task.await;

    info!("cors-relay stopped");
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` wins over `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("cors_relay={}", log.level).into());

    let (json, pretty) = if log.format.eq_ignore_ascii_case("json") {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
