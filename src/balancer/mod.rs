//! Load Balancing Subsystem
//!
//! Backend node registry with pluggable selection strategies and a
//! background staleness sweep. Selection only considers nodes currently
//! marked healthy; assignment re-validates capacity at bind time because
//! selection and assignment are never atomic together.

pub mod manager;
pub mod node;
pub mod strategy;

pub use manager::LoadBalancer;
pub use node::ServerNode;
pub use strategy::Strategy;
