//! Agent Lifecycle
//!
//! Shared lifecycle and metrics capability held by each long-running
//! component. Components compose an [`Agent`] rather than inheriting from a
//! base type: it tracks the running flag, start time, and a key -> numeric
//! metric sink, and renders a textual health snapshot for operators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lifecycle state and metric sink for one component
pub struct Agent {
    agent_id: String,
    running: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    metrics: Mutex<HashMap<String, f64>>,
}

impl Agent {
    /// Create a new agent in the stopped state
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Mark the agent as started. Returns false if it was already running.
    pub fn mark_started(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.started_at.lock().unwrap() = Some(Instant::now());
        debug!(agent_id = %self.agent_id, "agent started");
        true
    }

    /// Mark the agent as stopped. Returns false if it was not running.
    pub fn mark_stopped(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        debug!(agent_id = %self.agent_id, "agent stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Time since the most recent start, zero if never started
    pub fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Record a numeric metric value, overwriting any previous value
    pub fn update_metric(&self, key: &str, value: f64) {
        self.metrics.lock().unwrap().insert(key.to_string(), value);
    }

    /// Add a delta to a numeric metric, starting from zero if absent
    pub fn increment_metric(&self, key: &str, delta: f64) {
        *self
            .metrics
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert(0.0) += delta;
    }

    /// Read a metric, falling back to the given default
    pub fn get_metric(&self, key: &str, default: f64) -> f64 {
        self.metrics
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(default)
    }

    /// Snapshot of every recorded metric
    pub fn metrics(&self) -> HashMap<String, f64> {
        self.metrics.lock().unwrap().clone()
    }

    /// Textual health snapshot for operators and diagnostics endpoints
    pub fn health_check(&self) -> HashMap<String, String> {
        let mut health = HashMap::new();
        health.insert("agent_id".to_string(), self.agent_id.clone());
        health.insert("running".to_string(), self.is_running().to_string());
        health.insert(
            "uptime_seconds".to_string(),
            format!("{:.1}", self.uptime().as_secs_f64()),
        );

        for (key, value) in self.metrics.lock().unwrap().iter() {
            health.insert(format!("metric_{}", key), format!("{}", value));
        }

        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_flags() {
        let agent = Agent::new("test-agent");
        assert!(!agent.is_running());

        assert!(agent.mark_started());
        assert!(agent.is_running());
        // Second start is a no-op
        assert!(!agent.mark_started());

        assert!(agent.mark_stopped());
        assert!(!agent.is_running());
        // Second stop is a no-op
        assert!(!agent.mark_stopped());
    }

    #[test]
    fn test_metric_sink() {
        let agent = Agent::new("test-agent");
        assert_eq!(agent.get_metric("missing", 42.0), 42.0);

        agent.update_metric("connections_total", 3.0);
        assert_eq!(agent.get_metric("connections_total", 0.0), 3.0);

        agent.increment_metric("connections_total", 2.0);
        assert_eq!(agent.get_metric("connections_total", 0.0), 5.0);

        agent.increment_metric("rejections", 1.0);
        assert_eq!(agent.get_metric("rejections", 0.0), 1.0);
    }

    #[test]
    fn test_health_snapshot() {
        let agent = Agent::new("connection-manager");
        agent.mark_started();
        agent.update_metric("connections_total", 7.0);

        let health = agent.health_check();
        assert_eq!(health.get("agent_id").unwrap(), "connection-manager");
        assert_eq!(health.get("running").unwrap(), "true");
        assert!(health.contains_key("uptime_seconds"));
        assert_eq!(health.get("metric_connections_total").unwrap(), "7");
    }
}
