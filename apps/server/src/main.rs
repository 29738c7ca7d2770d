//! Now-playing relay server.
//!
//! Headless daemon that keeps one playback backend active and serves the
//! unified now-playing state to display clients over WebSocket.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nowplaying_core::{bootstrap_services, start_server, JsonFileStore, KeyValueStore, MemoryStore};
use tokio::signal;
use tokio::sync::oneshot;

use crate::config::ServerConfig;

/// How long the HTTP server may take to drain after shutdown begins.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Now-playing relay - one playback backend, many display clients.
#[derive(Parser, Debug)]
#[command(name = "nowplaying-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "NOWPLAYING_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "NOWPLAYING_BIND_PORT")]
    port: Option<u16>,

    /// Data directory for persistent state (handler settings, lyrics cache).
    #[arg(short = 'd', long, env = "NOWPLAYING_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Handler to activate at startup (spotify, spotify-free, native, none).
    #[arg(long, env = "NOWPLAYING_HANDLER")]
    handler: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Now-playing relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }
    if let Some(handler) = args.handler {
        config.handler = Some(handler);
    }

    let store: Arc<dyn KeyValueStore> = match config.data_dir {
        Some(ref data_dir) => {
            log::info!("Using data directory: {}", data_dir.display());
            Arc::new(JsonFileStore::open(data_dir).with_context(|| {
                format!("Failed to open data directory: {}", data_dir.display())
            })?)
        }
        None => {
            log::info!("No data directory configured - settings will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = config.socket_addr();
    let services = bootstrap_services(config.relay, store).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    match services.restore_active_handler(config.handler.as_deref()).await {
        Some(name) => log::info!("Active handler: {}", name),
        None => log::info!("No active handler"),
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app_state = services.app_state();
    let mut server_handle = tokio::spawn(async move {
        let stop = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = start_server(app_state, addr, stop).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal, or the server dying on its own
    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
        _ = &mut server_handle => {
            services.shutdown().await;
            anyhow::bail!("HTTP server exited unexpectedly");
        }
    }

    // Sockets are closed here, so the server can drain
    services.shutdown().await;
    let _ = stop_tx.send(());
    if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, &mut server_handle)
        .await
        .is_err()
    {
        log::warn!("HTTP server did not drain in time, aborting");
        server_handle.abort();
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
