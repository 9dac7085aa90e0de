//! gamegate - Real-Time Game Gateway
//!
//! Connection-admission and load-distribution core for a game server
//! fleet. Clients connect over WebSocket; admitted sessions are routed to
//! backend compute nodes by a pluggable balancing strategy with continuous
//! health monitoring.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gamegate::config::ConfigManager;
use gamegate::{gateway, ConnectionManager, LoadBalancer, ShutdownCoordinator, TransportServer};

/// CLI arguments for gamegate
#[derive(Parser, Debug)]
#[command(name = "gamegate")]
#[command(about = "gamegate - Real-Time Game Gateway")]
#[command(version)]
#[command(long_about = "
gamegate - Real-Time Game Gateway

Admits WebSocket client connections and distributes their sessions across
backend game servers.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  GAMEGATE_BIND_ADDR        - Bind address (e.g., 127.0.0.1:8080)
  GAMEGATE_MAX_CONNECTIONS  - Maximum concurrent sessions
  GAMEGATE_IDLE_TIMEOUT     - Idle session timeout (e.g., 5m, 30s)
  GAMEGATE_STRATEGY         - Balancing strategy
  GAMEGATE_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:8080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Balancing strategy (round_robin, least_connections, least_load,
    /// weighted_round_robin, ip_hash)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting gamegate v{}", env!("CARGO_PKG_VERSION"));

    // CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.strategy.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max sessions: {}", config.session.max_connections);
        info!("  Idle timeout: {:?}", config.session.idle_timeout);
        info!("  Strategy: {}", config.balancer.strategy);
        info!("  Backends: {}", config.backends.len());
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Bind address: {}", config.server.bind_addr);
    info!("Max sessions: {}", config.session.max_connections);
    info!("Balancing strategy: {}", config.balancer.strategy);

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    // Session registry with its idle sweep
    let sessions = Arc::new(ConnectionManager::new(config.session.max_connections));
    sessions.start();
    sessions.spawn_sweep(config.session.sweep_interval, config.session.idle_timeout);

    // Balancer with the startup fleet and its staleness sweep
    let strategy = config
        .balancer
        .strategy
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let balancer = Arc::new(LoadBalancer::new(
        strategy,
        config.balancer.stale_status_timeout,
    ));
    balancer.start();
    for backend in &config.backends {
        balancer
            .add_server(
                &backend.id,
                &backend.host,
                backend.port,
                backend.max_connections,
            )
            .with_context(|| format!("Failed to register backend {}", backend.id))?;
    }
    balancer.start_health_sweep(config.balancer.health_sweep_interval);

    // Transport server and the event pump wiring it to the registries
    let (transport, event_rx) = TransportServer::new(config.server.handshake_timeout);
    let transport = Arc::new(transport);

    let server_handle = {
        let transport = Arc::clone(&transport);
        let bind_addr = config.server.bind_addr;
        let shutdown_rx = shutdown_coordinator.subscribe();
        tokio::spawn(async move {
            if let Err(e) = transport.run(bind_addr, shutdown_rx).await {
                error!("Transport server error: {}", e);
            }
        })
    };

    let pump_handle = {
        let transport = Arc::clone(&transport);
        let sessions = Arc::clone(&sessions);
        let balancer = Arc::clone(&balancer);
        tokio::spawn(async move {
            gateway::run(event_rx, transport, sessions, balancer).await;
        })
    };

    info!("gamegate started, press Ctrl+C or send SIGTERM to shut down");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    // Accept loop is stopping and live connections got close frames; wait
    // for their teardown to drain the session registry, then stop the
    // background sweeps and join the workers.
    info!("Initiating graceful shutdown");
    shutdown_coordinator.drain_sessions(&sessions).await?;

    sessions.stop();
    balancer.stop();

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Transport server task failed: {}", e);
        }
    }

    // The drain already guaranteed every pending event was consumed
    pump_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
