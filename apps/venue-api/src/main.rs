//! # Atrio Venue API
//!
//! HTTP server for terminal synchronization at a single venue.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Venue API Server                                 │
//! │                                                                         │
//! │  POS Terminal ───► HTTP (8080) ───► Services ───► SQLite               │
//! │                                         │                               │
//! │                                         ▼                               │
//! │                                   JwtManager                            │
//! │                              (device credentials)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use atrio_venue_api::routes::router;
use atrio_venue_api::{AppState, Database, VenueConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .init();

    info!("Starting Atrio Venue API server...");

    // Load configuration
    let config = VenueConfig::load()?;
    info!(port = config.http_port, "Configuration loaded");

    // Connect to the database and apply migrations
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    info!(url = %config.database_url, "Database ready");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let state = Arc::new(AppState { config, db });
    let app = router(state);

    info!(%addr, "Venue API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Venue API shut down cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
