//! Update hub entry point.
//!
//! WebSocket hub for real-time POI, weather, traffic and route updates.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use update_hub::{create_router, AppState, Hub, HubConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting update hub");

    let config = HubConfig::from_env()?;

    info!("Configuration:");
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  HEARTBEAT_SWEEP: {:?}", config.heartbeat.sweep_interval);
    info!("  HEARTBEAT_TIMEOUT: {:?}", config.heartbeat.timeout);
    info!("  CLIENT_HEARTBEAT: {:?}", config.heartbeat.client_interval);
    info!("  OUTBOUND_QUEUE_SIZE: {}", config.outbound_queue_size);
    info!("  MAX_CONNECTIONS: {}", config.max_connections);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let http_port = config.http_port;
    let hub = Arc::new(Hub::new(config));

    // Heartbeat sweep lives until shutdown
    let (sweep_shutdown_tx, sweep_shutdown_rx) = mpsc::channel(1);
    let sweep_handle = tokio::spawn(hub.clone().run_heartbeat_sweep(sweep_shutdown_rx));

    let state = Arc::new(AppState { hub: hub.clone() });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Update hub listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping heartbeat sweep...");
    let _ = sweep_shutdown_tx.send(()).await;
    if let Err(e) = sweep_handle.await {
        warn!("Heartbeat sweep task failed: {}", e);
    }

    info!("Closing {} connections", hub.connection_count());
    hub.close_all();

    info!("Update hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
