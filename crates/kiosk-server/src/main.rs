//! kiosk-server: session and billing server for pay-per-time kiosks.
//!
//! Serves the login endpoint and admin API over HTTP, and runs the realtime
//! channel over WebSocket: kiosks hold metered sessions, admin consoles
//! observe live state.

mod api;
mod auth;
mod channel;
mod config;
mod hub;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{ConfigOverrides, ServerConfig};
use server::KioskServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// kiosk-server — pay-per-time kiosk session server
#[derive(Parser, Debug)]
#[command(name = "kiosk-server", version, about = "Pay-per-time kiosk session server")]
struct Cli {
    /// HTTP listen port (login form, admin API)
    #[arg(short, long)]
    port: Option<u16>,

    /// WebSocket listen port (defaults to HTTP port + 1)
    #[arg(long)]
    ws_port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Directory holding ledger.json and settings.json
    #[arg(long)]
    data_dir: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.kiosk/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting kiosk-server");

    let overrides = ConfigOverrides {
        bind: cli.bind,
        port: cli.port,
        ws_port: cli.ws_port,
        data_dir: cli.data_dir,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = match KioskServer::bind(server_config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("kiosk-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    info!("received shutdown signal");
}
