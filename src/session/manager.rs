//! Session Registry

use crate::agent::Agent;
use crate::error::GateError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything tracked about one admitted session
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub source_ip: String,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub authenticated: bool,
    /// Monotonic byte counters, fed by the gateway loop
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl ConnectionRecord {
    fn new(id: &str, source_ip: &str) -> Self {
        let now = Instant::now();
        Self {
            id: id.to_string(),
            user_id: None,
            source_ip: source_ip.to_string(),
            connected_at: now,
            last_activity: now,
            authenticated: false,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

/// Point-in-time registry summary
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub active: usize,
    pub authenticated: usize,
    pub max_connections: usize,
    pub utilization: f64,
}

/// Admission control and per-session state, keyed by connection id
pub struct ConnectionManager {
    agent: Agent,
    max_connections: usize,
    connections: Mutex<HashMap<String, ConnectionRecord>>,
    /// Mirrors the registry size; only mutated while the registry lock is
    /// held, so the two never disagree
    active: AtomicUsize,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            agent: Agent::new("connection-manager"),
            max_connections,
            connections: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            sweep_handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if !self.agent.mark_started() {
            warn!("Connection manager already running");
            return;
        }
        info!(max_connections = self.max_connections, "Connection manager started");
    }

    /// Stop the manager and its idle sweep. Safe to call twice.
    pub fn stop(&self) {
        if !self.agent.mark_stopped() {
            return;
        }

        if let Some(handle) = self.sweep_handle.lock().unwrap().take() {
            handle.abort();
        }

        info!("Connection manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.agent.is_running()
    }

    pub fn health_check(&self) -> HashMap<String, String> {
        self.agent.health_check()
    }

    /// Admit a new session.
    ///
    /// A duplicate live id is rejected and the existing record is left
    /// untouched. The insert and the active counter move together under
    /// the registry lock.
    pub fn admit(&self, id: &str, source_ip: &str) -> Result<(), GateError> {
        let mut connections = self.connections.lock().unwrap();

        if connections.len() >= self.max_connections {
            self.agent.increment_metric("connections_rejected", 1.0);
            return Err(GateError::CapacityExceeded(format!(
                "connection limit {} reached",
                self.max_connections
            )));
        }

        if connections.contains_key(id) {
            self.agent.increment_metric("connections_rejected", 1.0);
            return Err(GateError::DuplicateEntity(format!("connection {}", id)));
        }

        connections.insert(id.to_string(), ConnectionRecord::new(id, source_ip));
        self.active.store(connections.len(), Ordering::Release);

        debug!(connection_id = %id, source_ip = %source_ip, "Session admitted");
        self.agent.increment_metric("connections_admitted", 1.0);
        self.agent.update_metric("connections_active", connections.len() as f64);
        Ok(())
    }

    /// Drop a session; no-op for an unknown id. Returns whether a record
    /// was actually removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut connections = self.connections.lock().unwrap();

        let removed = connections.remove(id).is_some();
        if removed {
            self.active.store(connections.len(), Ordering::Release);
            debug!(connection_id = %id, "Session removed");
            self.agent.update_metric("connections_active", connections.len() as f64);
        }
        removed
    }

    /// Attach a user identity to a session; no-op for an unknown id
    pub fn authenticate(&self, id: &str, user_id: &str) {
        let mut connections = self.connections.lock().unwrap();

        if let Some(record) = connections.get_mut(id) {
            record.user_id = Some(user_id.to_string());
            record.authenticated = true;
            info!(connection_id = %id, user_id = %user_id, "Session authenticated");
        }
    }

    /// Refresh the last-activity instant; no-op for an unknown id
    pub fn touch(&self, id: &str) {
        let mut connections = self.connections.lock().unwrap();

        if let Some(record) = connections.get_mut(id) {
            record.last_activity = Instant::now();
        }
    }

    pub fn record_sent(&self, id: &str, bytes: u64) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(record) = connections.get_mut(id) {
            record.bytes_sent += bytes;
        }
    }

    pub fn record_received(&self, id: &str, bytes: u64) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(record) = connections.get_mut(id) {
            record.bytes_received += bytes;
        }
    }

    /// Point-in-time snapshot of one session
    pub fn get_connection(&self, id: &str) -> Option<ConnectionRecord> {
        self.connections.lock().unwrap().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        let connections = self.connections.lock().unwrap();
        let active = connections.len();
        let authenticated = connections.values().filter(|r| r.authenticated).count();

        SessionStats {
            active,
            authenticated,
            max_connections: self.max_connections,
            utilization: active as f64 / self.max_connections as f64,
        }
    }

    /// Evict sessions idle longer than `timeout`. Expired ids are collected
    /// under the lock, then evicted through `remove` after it is released.
    /// Returns how many sessions were evicted.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let expired: Vec<String> = {
            let connections = self.connections.lock().unwrap();
            connections
                .values()
                .filter(|r| r.last_activity.elapsed() > timeout)
                .map(|r| r.id.clone())
                .collect()
        };

        for id in &expired {
            warn!(connection_id = %id, "Evicting idle session");
            self.remove(id);
        }

        if !expired.is_empty() {
            self.agent.increment_metric("connections_swept", expired.len() as f64);
        }
        expired.len()
    }

    /// Run `sweep` on a fixed cadence until the manager stops. The sweep
    /// itself never self-schedules; the cadence belongs to the host.
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration, timeout: Duration) {
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !manager.is_running() {
                    break;
                }
                let evicted = manager.sweep(timeout);
                if evicted > 0 {
                    info!(evicted = evicted, "Idle sweep evicted sessions");
                }
            }
        });

        *self.sweep_handle.lock().unwrap() = Some(handle);
        info!(interval = ?interval, timeout = ?timeout, "Idle sweep started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_tracks_count_and_utilization() {
        let manager = ConnectionManager::new(4);
        manager.admit("c1", "10.0.0.1").unwrap();
        manager.admit("c2", "10.0.0.2").unwrap();

        assert_eq!(manager.active_count(), 2);
        let stats = manager.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.max_connections, 4);
        assert!((stats.utilization - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_admit_rejects_over_capacity() {
        let manager = ConnectionManager::new(2);
        manager.admit("c1", "10.0.0.1").unwrap();
        manager.admit("c2", "10.0.0.2").unwrap();

        assert!(matches!(
            manager.admit("c3", "10.0.0.3"),
            Err(GateError::CapacityExceeded(_))
        ));
        assert_eq!(manager.active_count(), 2);

        // Capacity frees up once a session leaves
        assert!(manager.remove("c1"));
        manager.admit("c3", "10.0.0.3").unwrap();
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_duplicate_admit_leaves_record_untouched() {
        let manager = ConnectionManager::new(10);
        manager.admit("c1", "10.0.0.1").unwrap();
        manager.authenticate("c1", "player-7");

        assert!(matches!(
            manager.admit("c1", "10.99.99.99"),
            Err(GateError::DuplicateEntity(_))
        ));

        let record = manager.get_connection("c1").unwrap();
        assert_eq!(record.source_ip, "10.0.0.1");
        assert_eq!(record.user_id.as_deref(), Some("player-7"));
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_ghost_operations_are_noops() {
        let manager = ConnectionManager::new(10);

        assert!(!manager.remove("ghost"));
        manager.authenticate("ghost", "player-1");
        manager.touch("ghost");
        manager.record_sent("ghost", 100);
        manager.record_received("ghost", 100);

        assert_eq!(manager.active_count(), 0);
        assert!(manager.get_connection("ghost").is_none());
    }

    #[test]
    fn test_touch_advances_last_activity() {
        let manager = ConnectionManager::new(10);
        manager.admit("c1", "10.0.0.1").unwrap();

        let before = manager.get_connection("c1").unwrap().last_activity;
        std::thread::sleep(Duration::from_millis(10));
        manager.touch("c1");
        let after = manager.get_connection("c1").unwrap().last_activity;

        assert!(after > before);
    }

    #[test]
    fn test_byte_counters_accumulate() {
        let manager = ConnectionManager::new(10);
        manager.admit("c1", "10.0.0.1").unwrap();

        manager.record_sent("c1", 128);
        manager.record_sent("c1", 64);
        manager.record_received("c1", 32);

        let record = manager.get_connection("c1").unwrap();
        assert_eq!(record.bytes_sent, 192);
        assert_eq!(record.bytes_received, 32);
    }

    #[test]
    fn test_sweep_evicts_only_idle_sessions() {
        let manager = ConnectionManager::new(10);
        manager.admit("idle", "10.0.0.1").unwrap();
        manager.admit("busy", "10.0.0.2").unwrap();

        std::thread::sleep(Duration::from_millis(30));
        manager.touch("busy");

        assert_eq!(manager.sweep(Duration::from_millis(20)), 1);
        assert!(manager.get_connection("idle").is_none());
        assert!(manager.get_connection("busy").is_some());

        // Nothing left to evict under a generous timeout
        assert_eq!(manager.sweep(Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_stats_counts_authenticated() {
        let manager = ConnectionManager::new(10);
        manager.admit("c1", "10.0.0.1").unwrap();
        manager.admit("c2", "10.0.0.2").unwrap();
        manager.authenticate("c1", "player-1");

        let stats = manager.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.authenticated, 1);
    }

    #[tokio::test]
    async fn test_double_stop_is_safe() {
        let manager = Arc::new(ConnectionManager::new(10));
        manager.start();
        manager.spawn_sweep(Duration::from_secs(1), Duration::from_secs(60));
        assert!(manager.is_running());

        manager.stop();
        manager.stop();
        assert!(!manager.is_running());
    }
}
