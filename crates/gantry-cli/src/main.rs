//! # Gantry CLI Entry Point
//!
//! Main binary for the Gantry gateway: loads and validates the JSON
//! configuration, wires the resilience components, starts the config
//! watcher and the rate-limit sweeper, and serves until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Start the gateway
//! gantry --config config/gateway.json
//!
//! # Override the listen address from the configuration
//! gantry --config config/gateway.json --listen 127.0.0.1:8088
//! ```
//!
//! Logging defaults to `info` and honors the `RUST_LOG` environment
//! variable. The process exits 0 on graceful shutdown and non-zero on
//! fatal startup errors (missing or invalid configuration, listener
//! failure).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;

use gantry_config::{ConfigStore, ConfigWatcher, GatewayConfig};
use gantry_proxy::{GatewayServer, Pipeline};

/// How often idle rate-limit clients are swept, and how long a client may
/// idle before its state is reclaimed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SWEEP_MAX_IDLE: Duration = Duration::from_secs(600);

#[derive(FromArgs)]
/// Gantry - a resilient HTTP reverse proxy gateway
struct Cli {
    /// path to the JSON configuration file
    #[argh(option, short = 'c')]
    config: PathBuf,

    /// override the listen address from the configuration
    #[argh(option, short = 'l')]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default log level is INFO; RUST_LOG overrides.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
        config
            .validate()
            .context("invalid listen address override")?;
    }

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;
    tracing::info!(
        routes = config.routes.len(),
        rate_limit = config.rate_limit.enabled,
        cache = config.cache.enabled,
        circuit_breaker = config.circuit_breaker.enabled,
        "configuration loaded"
    );

    let store = Arc::new(ConfigStore::new(config));

    // A failing watcher degrades hot reload, not the gateway itself.
    let _watcher = match ConfigWatcher::spawn(cli.config.clone(), Arc::clone(&store)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "config hot reload disabled");
            None
        }
    };

    let pipeline = Arc::new(Pipeline::from_store(Arc::clone(&store))?);
    let _sweeper = Arc::clone(pipeline.limiter()).spawn_sweeper(SWEEP_INTERVAL, SWEEP_MAX_IDLE);

    GatewayServer::new(pipeline).run(addr).await?;
    tracing::info!("gateway exited");
    Ok(())
}
