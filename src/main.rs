//! uogate proxy server
//!
//! Accepts game-client connections, classifies them through the
//! handshake, and hands them to connection tasks that own the upstream
//! sessions.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use uogate::config::ProxyConfig;
use uogate::proxy::handshake;
use uogate::proxy::ConnectionRegistry;
use uogate::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("uogate v{} starting", VERSION);

    // Configuration errors are fatal before anything is constructed
    let config = Arc::new(ProxyConfig::load()?);
    info!(
        bind = %config.bind_address,
        server = %config.server_address,
        autoreconnect = config.autoreconnect,
        background = config.background,
        "configuration loaded"
    );

    let registry = Arc::new(ConnectionRegistry::new());

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(address = %config.bind_addr(), "listening for game clients");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(wait_for_shutdown(shutdown_tx));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, address)) => {
                        info!(address = %address, "client connected");
                        let config = config.clone();
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            handshake::handle_socket(stream, address, config, registry).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("acceptor shutting down");
                break;
            }
        }
    }

    info!(
        sessions = registry.len(),
        "shutdown complete, goodbye"
    );
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,uogate=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
}
