//! Gamegate Library
//!
//! Connection-admission and load-distribution core for a real-time game
//! server gateway. Accepts persistent WebSocket client connections, tracks
//! their lifecycle, and routes sessions to backend compute nodes using
//! pluggable balancing strategies with continuous health monitoring.
//!
//! All state is in-memory and rebuilt on restart; no durability guarantees
//! are made.

pub mod agent;
pub mod balancer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use agent::Agent;
pub use balancer::LoadBalancer;
pub use config::Config;
pub use error::GateError;
pub use session::ConnectionManager;
pub use shutdown::ShutdownCoordinator;
pub use transport::TransportServer;

/// Common result type; startup and I/O paths use the `anyhow` default,
/// domain operations name a [`GateError`] explicitly
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
