//! Configuration Manager

use super::Config;
use crate::balancer::Strategy;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("GAMEGATE_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid GAMEGATE_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(max_conn) = std::env::var("GAMEGATE_MAX_CONNECTIONS") {
            config.session.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid GAMEGATE_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(idle) = std::env::var("GAMEGATE_IDLE_TIMEOUT") {
            config.session.idle_timeout = humantime::parse_duration(&idle)
                .with_context(|| format!("Invalid GAMEGATE_IDLE_TIMEOUT: {}", idle))?;
        }

        if let Ok(strategy) = std::env::var("GAMEGATE_STRATEGY") {
            config.balancer.strategy = strategy;
        }

        if let Ok(log_level) = std::env::var("GAMEGATE_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_session_config()
            .with_context(|| "Session configuration validation failed")?;

        self.validate_balancer_config()
            .with_context(|| "Balancer configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        self.validate_backends()
            .with_context(|| "Backend configuration validation failed")?;

        Ok(())
    }

    fn validate_session_config(&self) -> Result<()> {
        if self.session.max_connections == 0 {
            bail!("session.max_connections must be greater than 0");
        }

        if self.session.max_connections > 100_000 {
            bail!("session.max_connections cannot exceed 100,000 for safety");
        }

        if self.session.idle_timeout.as_secs() == 0 {
            bail!("session.idle_timeout must be greater than 0");
        }

        if self.session.sweep_interval.as_secs() == 0 {
            bail!("session.sweep_interval must be greater than 0");
        }

        Ok(())
    }

    fn validate_balancer_config(&self) -> Result<()> {
        if self.balancer.strategy.parse::<Strategy>().is_err() {
            bail!(
                "balancer.strategy must be one of: round_robin, least_connections, \
                 least_load, weighted_round_robin, ip_hash"
            );
        }

        if self.balancer.health_sweep_interval.as_secs() == 0 {
            bail!("balancer.health_sweep_interval must be greater than 0");
        }

        if self.balancer.stale_status_timeout.as_secs() == 0 {
            bail!("balancer.stale_status_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_backends(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();

        for backend in &self.backends {
            if backend.id.is_empty() {
                bail!("backend id cannot be empty");
            }
            if !seen.insert(backend.id.as_str()) {
                bail!("duplicate backend id: {}", backend.id);
            }
            if backend.max_connections == 0 {
                bail!("backend {} max_connections must be greater than 0", backend.id);
            }
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        strategy: Option<&str>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.session.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(strategy) = strategy {
            self.balancer.strategy = strategy.to_string();
            tracing::info!("CLI override: balancing strategy set to {}", strategy);
        }
    }
}
