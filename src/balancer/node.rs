//! Backend Server Node

use std::time::Instant;

/// Load score above which a node stops accepting new assignments
pub const LOAD_SCORE_CEILING: f64 = 0.8;

/// A single backend compute node tracked by the balancer
#[derive(Debug, Clone)]
pub struct ServerNode {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub current_connections: u32,
    pub max_connections: u32,
    /// CPU gauge in [0.0, 1.0], pushed by the node via update_status
    pub cpu_usage: f64,
    /// Memory gauge in [0.0, 1.0], pushed by the node via update_status
    pub memory_usage: f64,
    pub healthy: bool,
    /// Refreshed on every pushed status; the staleness sweep keys off this
    pub last_status_at: Instant,
}

impl ServerNode {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, max_connections: u32) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            current_connections: 0,
            max_connections,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            healthy: true,
            last_status_at: Instant::now(),
        }
    }

    /// Weighted composite of CPU, memory, and connection ratio
    pub fn load_score(&self) -> f64 {
        let connection_ratio = if self.max_connections == 0 {
            1.0
        } else {
            f64::from(self.current_connections) / f64::from(self.max_connections)
        };

        self.cpu_usage * 0.4 + self.memory_usage * 0.3 + connection_ratio * 0.3
    }

    /// Admission ceiling, stricter than mere selection eligibility
    pub fn can_accept(&self) -> bool {
        self.healthy
            && self.current_connections < self.max_connections
            && self.load_score() < LOAD_SCORE_CEILING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_score_weighting() {
        let mut node = ServerNode::new("game-1", "127.0.0.1", 9001, 100);
        node.cpu_usage = 0.5;
        node.memory_usage = 0.4;
        node.current_connections = 30;

        // 0.4*0.5 + 0.3*0.4 + 0.3*0.3
        let expected = 0.2 + 0.12 + 0.09;
        assert!((node.load_score() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_can_accept_requires_health() {
        let mut node = ServerNode::new("game-1", "127.0.0.1", 9001, 100);
        assert!(node.can_accept());

        node.healthy = false;
        assert!(!node.can_accept());
    }

    #[test]
    fn test_can_accept_at_capacity() {
        let mut node = ServerNode::new("game-1", "127.0.0.1", 9001, 10);
        node.current_connections = 10;
        assert!(!node.can_accept());
    }

    #[test]
    fn test_can_accept_load_ceiling() {
        let mut node = ServerNode::new("game-1", "127.0.0.1", 9001, 1000);
        node.cpu_usage = 0.9;
        node.memory_usage = 0.9;
        // Healthy and under the connection cap, but the load score is over 0.8
        assert!(node.healthy);
        assert!(node.current_connections < node.max_connections);
        assert!(!node.can_accept());
    }
}
