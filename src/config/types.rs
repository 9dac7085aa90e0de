//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub balancer: BalancerConfig,
    pub monitoring: MonitoringConfig,
    /// Backend nodes registered with the balancer at startup. More can
    /// arrive at runtime; an empty fleet is legal but routes nothing.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// One backend compute node known at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub max_connections: u32,
}

/// Transport server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Session registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub max_connections: usize,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

/// Load balancer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Selection strategy: round_robin, least_connections, least_load,
    /// weighted_round_robin, or ip_hash
    pub strategy: String,
    #[serde(with = "humantime_serde")]
    pub health_sweep_interval: Duration,
    /// A node whose status is older than this is marked unhealthy
    #[serde(with = "humantime_serde")]
    pub stale_status_timeout: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:8080".parse().unwrap(),
                handshake_timeout: Duration::from_secs(10),
                shutdown_timeout: Duration::from_secs(30),
            },
            session: SessionConfig {
                max_connections: 5000,
                idle_timeout: Duration::from_secs(300),
                sweep_interval: Duration::from_secs(60),
            },
            balancer: BalancerConfig {
                strategy: "least_load".to_string(),
                health_sweep_interval: Duration::from_secs(30),
                stale_status_timeout: Duration::from_secs(300),
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
            backends: Vec::new(),
        }
    }
}
