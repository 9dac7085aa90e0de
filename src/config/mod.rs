//! Configuration Module
//!
//! TOML-backed configuration with environment-variable fallback and CLI
//! overrides. Durations are written in human-friendly form ("30s", "5m").

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::{
    BackendConfig, BalancerConfig, Config, MonitoringConfig, ServerConfig, SessionConfig,
};
