//! metrodb server binary
//!
//! Loads configuration, scans the data directory for existing databases
//! and serves the RPC operations over HTTP until interrupted.
//!
//! Configuration is read from, in order:
//! 1. the file named by the `METRODB_CONFIG` environment variable
//! 2. `./metrodb.toml` in the current directory
//! 3. built-in defaults with environment overrides

use metrodb::{rpc, Config, Registry, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

fn load_config() -> Config {
    if let Ok(path) = std::env::var("METRODB_CONFIG") {
        match Config::from_file(&path) {
            Ok(mut config) => {
                config.apply_env_overrides();
                return config;
            }
            Err(e) => {
                eprintln!("[config] {e}; falling back to defaults");
            }
        }
    }

    if std::path::Path::new("metrodb.toml").exists() {
        match Config::from_file("metrodb.toml") {
            Ok(mut config) => {
                config.apply_env_overrides();
                return config;
            }
            Err(e) => {
                eprintln!("[config] {e}; falling back to defaults");
            }
        }
    }

    Config::from_env()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    config.validate()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "starting metrodb v{} (data={:?}, recovery={})",
        env!("CARGO_PKG_VERSION"),
        config.storage.data_dir,
        config.storage.recovery
    );

    let registry = Registry::scan(&config.storage.data_dir, config.storage.recovery).await?;
    let server = Arc::new(Server::new(registry));
    let app = rpc::router(server);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}
