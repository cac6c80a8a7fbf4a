//! Gemini Key Proxy
//!
//! Forwards every request to the upstream API, rotating through a pool of API
//! keys, and serves request statistics on a separate admin listener.

use anyhow::{Context, Result};
use clap::Parser;
use gemini_key_proxy::{
    config::{load_keys_file, Environment, Settings},
    logging::init_tracing,
    server::App,
};
use std::path::PathBuf;

/// Gemini Key Proxy
///
/// Rotates API keys across requests to a single upstream API.
#[derive(Parser, Debug)]
#[command(name = "gemini-key-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// File with one API key per line (overrides KEYS_FILE env var)
    #[arg(short, long)]
    keys_file: Option<PathBuf>,

    /// Upstream base URL (overrides UPSTREAM_URL env var)
    #[arg(short, long)]
    upstream: Option<String>,

    /// Admin API port, 0 disables it (overrides ADMIN_PORT env var)
    #[arg(long)]
    admin_port: Option<u16>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Log file path for JSON logs (enables file logging with 10MB rotation)
    /// Example: --log-file /var/log/proxy/app.log
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(keys_file) = args.keys_file {
        settings.keys_file = keys_file;
    }
    if let Some(upstream) = args.upstream {
        settings.upstream_url = upstream;
    }
    if let Some(admin_port) = args.admin_port {
        settings.admin_port = admin_port;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    settings
        .validate()
        .context("Invalid configuration after applying command line overrides")?;

    init_tracing(&settings.log_level, args.log_file.as_deref())?;

    let keys = load_keys_file(&settings.keys_file)?;

    let admin_addr = if settings.admin_enabled() {
        settings.admin_addr()
    } else {
        "disabled".to_string()
    };
    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        proxy_addr = %settings.server_addr(),
        admin_addr = %admin_addr,
        upstream = %settings.upstream_url,
        keys = keys.len(),
        "Starting application"
    );

    let app = App::new(settings, keys)?;

    app.run_with_graceful_shutdown().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}
