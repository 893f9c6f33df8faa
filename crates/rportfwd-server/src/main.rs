//! # rportfwd Server
//!
//! Host process for the relay engine: starts the configured forwards and
//! keeps them running until interrupted.

use std::path::Path;

use anyhow::{Context, Result};
use rportfwd_core::{Config, ForwardRequest, LoggingConfig, PortForwarder};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let (config, config_path) = load_config()?;

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = init_logging(&config.logging)?;

    info!("Starting rportfwd v{}", env!("CARGO_PKG_VERSION"));
    match config_path {
        Some(path) => info!("Loaded configuration from {}", path),
        None => info!("No config file found, using defaults"),
    }

    let forwarder = PortForwarder::new(config.relay.clone());

    for forward in config.forwards {
        let request = ForwardRequest::from(forward);
        let bind_port = request.bind_port;
        if let Err(e) = forwarder.start_request(request).await {
            error!(bind_port, error = %e, "Failed to start forward");
        }
    }

    let active = forwarder.list().await;
    if active.is_empty() {
        warn!("No forwards active");
    }
    for forward in &active {
        info!(
            "  {}:{} -> {}:{}",
            forward.bind_addresses, forward.bind_port, forward.forward_address, forward.forward_port
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let stopped = forwarder.stop_all().await;
    info!(stopped, "rportfwd shutting down");
    Ok(())
}

/// Load configuration from file or use defaults.
/// Returns (Config, Option<config_path>)
fn load_config() -> Result<(Config, Option<String>)> {
    let config_paths = ["rportfwd.toml", "/etc/rportfwd/config.toml"];

    for path in config_paths {
        if Path::new(path).exists() {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config file: {}", path))?;
            return Ok((config, Some(path.to_string())));
        }
    }

    Ok((Config::default(), None))
}

/// Initialize logging to stdout, or to the configured file.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let Some(file) = &logging.file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .init();
        return Ok(None);
    };

    let path = Path::new(file);
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", file))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(Some(guard))
}
