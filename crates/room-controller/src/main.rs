//! Room Controller
//!
//! Signaling control plane for rooms spanning multiple media-processing
//! nodes.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Build the token signer and the server manager
//! 3. Hand the manager to the transport layer, which attaches accepted
//!    signaling channels via `ServerManager::handle_connection`
//! 4. Wait for shutdown signal, then close every room gracefully

#![warn(clippy::pedantic)]

use std::sync::Arc;

use anyhow::Context;
use common::token::TokenSigner;
use room_controller::config::Config;
use room_controller::signaling::ServerManager;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env()
        .map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })
        .context("configuration")?;

    info!(
        rc_id = %config.rc_id,
        region = %config.region,
        request_timeout_ms = config.request_timeout_ms,
        "Configuration loaded successfully"
    );

    let token_signer = TokenSigner::new(&config.peer_token_secret);
    let server_manager = Arc::new(ServerManager::new(token_signer, config.request_timeout()));

    // The transport layer (signaling sockets, node control channels) attaches
    // accepted channels to the manager from here on.
    info!(rc_id = %config.rc_id, "Room Controller ready");

    shutdown_signal().await;

    info!("Shutdown signal received, closing rooms");
    server_manager.close().await;
    info!("Room Controller stopped");

    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[expect(
        clippy::expect_used,
        reason = "failing to install signal handlers at startup is unrecoverable"
    )]
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    #[expect(
        clippy::expect_used,
        reason = "failing to install signal handlers at startup is unrecoverable"
    )]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
