//! Room Coordinator
//!
//! Clustered room coordination service: rooms of live connections spread
//! across server processes, with shared-store-backed membership,
//! middleware-intercepted join/leave/say, and pub/sub broadcast fan-out.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Connect to Redis (shared store)
//! 3. Build the coordinator and start its remote-invocation listener
//! 4. Wait for shutdown signal, then stop listener tasks

use room_coordinator::config::Config;
use room_coordinator::coordinator::RoomCoordinator;
use room_coordinator::store::RedisStore;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_coordinator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        server_id = %config.server_id,
        rpc_timeout_ms = config.rpc_timeout_ms,
        default_middleware_priority = config.default_middleware_priority,
        "Configuration loaded successfully"
    );

    // Connect to the shared store
    info!("Connecting to Redis...");
    let store = RedisStore::connect(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    info!("Redis connection established");

    // Build the coordinator and start listening for forwarded operations
    let coordinator = RoomCoordinator::new(&config, Arc::new(store));
    coordinator.start().await.map_err(|e| {
        error!(error = %e, "Failed to start coordinator");
        e
    })?;

    // Wait for shutdown
    shutdown_signal().await;
    info!("Shutdown signal received, stopping coordinator");
    coordinator.shutdown().await;
    info!("Room Coordinator stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
