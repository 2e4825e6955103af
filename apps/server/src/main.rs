//! Crowdjam Server - Standalone headless server for Crowdjam.
//!
//! Hosts the session engine behind the HTTP and WebSocket API.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crowdjam_core::{bootstrap_services, start_server};
use tokio::signal;
use tokio::sync::oneshot;

use crate::config::ServerConfig;

/// Crowdjam Server - collaborative listening sessions with voting rounds.
#[derive(Parser, Debug)]
#[command(name = "crowdjam-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CROWDJAM_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "CROWDJAM_BIND_PORT")]
    port: Option<u16>,

    /// Recommendation endpoint (overrides config file).
    #[arg(short = 'r', long, env = "CROWDJAM_RECOMMENDER_URL")]
    recommender_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Crowdjam Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(url) = args.recommender_url {
        config.recommender_url = Some(url);
    }

    log::info!(
        "Configuration: bind_port={}, recommender={}, host_disconnect={:?}",
        config.bind_port,
        config.recommender_url.as_deref().unwrap_or("none"),
        config.host_disconnect
    );

    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app_state = services.app_state();
    let server_handle = tokio::spawn(async move {
        let stopped = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = start_server(app_state, stopped).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    // Sessions end first so connected clients still receive session_ended.
    services.shutdown().await;
    let _ = stop_tx.send(());
    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
