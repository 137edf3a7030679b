// src/main.rs

//! The main entry point for the QDB server application.

use anyhow::Result;
use qdb::config::Config;
use qdb::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("QDB version {VERSION}");
        return Ok(());
    }

    // The configuration path comes from --config and defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        let Some(port_str) = args.get(port_index + 1) else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        };
        let applied = port_str
            .parse::<u16>()
            .map_err(anyhow::Error::from)
            .and_then(|port| config.set_port(port));
        if let Err(e) = applied {
            eprintln!("Invalid port number {port_str}: {e}");
            std::process::exit(1);
        }
    }

    // RUST_LOG wins over the configured level.
    let initial_log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}
