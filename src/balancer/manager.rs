//! Load Balancer Implementation

use crate::agent::Agent;
use crate::balancer::node::ServerNode;
use crate::balancer::strategy::Strategy;
use crate::error::GateError;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Routes sessions to backend nodes and tracks every assignment
pub struct LoadBalancer {
    agent: Agent,
    strategy: RwLock<Strategy>,
    /// Registry order is stable, which keeps ip_hash deterministic for a
    /// fixed fleet
    servers: RwLock<Vec<ServerNode>>,
    /// connection id -> server id, many-to-one
    assignments: Mutex<HashMap<String, String>>,
    round_robin_index: AtomicUsize,
    stale_status_timeout: Duration,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy, stale_status_timeout: Duration) -> Self {
        Self {
            agent: Agent::new("load-balancer"),
            strategy: RwLock::new(strategy),
            servers: RwLock::new(Vec::new()),
            assignments: Mutex::new(HashMap::new()),
            round_robin_index: AtomicUsize::new(0),
            stale_status_timeout,
            sweep_handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if !self.agent.mark_started() {
            warn!("Load balancer already running");
            return;
        }
        info!(strategy = %self.strategy.read().unwrap(), "Load balancer started");
    }

    /// Stop the balancer and its staleness sweep. Safe to call twice.
    pub fn stop(&self) {
        if !self.agent.mark_stopped() {
            return;
        }

        if let Some(handle) = self.sweep_handle.lock().unwrap().take() {
            handle.abort();
        }

        info!("Load balancer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.agent.is_running()
    }

    pub fn health_check(&self) -> HashMap<String, String> {
        self.agent.health_check()
    }

    /// Register a backend node. Replaces nothing: a duplicate id is rejected.
    pub fn add_server(
        &self,
        id: &str,
        host: &str,
        port: u16,
        max_connections: u32,
    ) -> Result<(), GateError> {
        let mut servers = self.servers.write().unwrap();

        if servers.iter().any(|s| s.id == id) {
            return Err(GateError::DuplicateEntity(format!("server {}", id)));
        }

        servers.push(ServerNode::new(id, host, port, max_connections));
        info!(server_id = %id, host = %host, port = port, "Added server");
        self.agent.update_metric("servers_total", servers.len() as f64);
        Ok(())
    }

    /// Deregister a backend node; no-op if the id is unknown
    pub fn remove_server(&self, id: &str) {
        let mut servers = self.servers.write().unwrap();

        if let Some(pos) = servers.iter().position(|s| s.id == id) {
            servers.remove(pos);
            info!(server_id = %id, "Removed server");
            self.agent.update_metric("servers_total", servers.len() as f64);
        }
    }

    /// Pick a backend for a client using the active strategy.
    ///
    /// Only nodes currently marked healthy are candidates. Returns `None`
    /// when no healthy node exists; the caller must handle absence.
    pub fn select(&self, client_ip: &str) -> Option<String> {
        let servers = self.servers.read().unwrap();
        let healthy: Vec<&ServerNode> = servers.iter().filter(|s| s.healthy).collect();

        if healthy.is_empty() {
            warn!("No healthy servers available for selection");
            return None;
        }

        let strategy = *self.strategy.read().unwrap();
        let selected = match strategy {
            Strategy::RoundRobin => self.select_round_robin(&healthy),
            Strategy::LeastConnections => self.select_least_connections(&healthy),
            Strategy::LeastLoad => self.select_least_load(&healthy),
            Strategy::WeightedRoundRobin => self.select_weighted_round_robin(&healthy),
            Strategy::IpHash => self.select_ip_hash(&healthy, client_ip),
        };

        debug!(strategy = %strategy, server_id = %selected, "Selected server");
        Some(selected)
    }

    fn select_round_robin(&self, candidates: &[&ServerNode]) -> String {
        let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates[index].id.clone()
    }

    fn select_least_connections(&self, candidates: &[&ServerNode]) -> String {
        candidates
            .iter()
            .min_by_key(|s| s.current_connections)
            .map(|s| s.id.clone())
            .expect("candidate set is non-empty")
    }

    fn select_least_load(&self, candidates: &[&ServerNode]) -> String {
        candidates
            .iter()
            .min_by(|a, b| {
                a.load_score()
                    .partial_cmp(&b.load_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| s.id.clone())
            .expect("candidate set is non-empty")
    }

    /// Probabilistic draw with weight proportional to 1/max_connections, so
    /// smaller-capacity nodes are chosen less often
    fn select_weighted_round_robin(&self, candidates: &[&ServerNode]) -> String {
        let weights: Vec<f64> = candidates
            .iter()
            .map(|s| 1.0 / f64::from(s.max_connections.max(1)))
            .collect();
        let total_weight: f64 = weights.iter().sum();

        let draw = rand::thread_rng().gen_range(0.0..total_weight);
        let mut cumulative = 0.0;

        for (node, weight) in candidates.iter().zip(&weights) {
            cumulative += weight;
            if draw <= cumulative {
                return node.id.clone();
            }
        }

        candidates[candidates.len() - 1].id.clone()
    }

    fn select_ip_hash(&self, candidates: &[&ServerNode], client_ip: &str) -> String {
        let mut hasher = DefaultHasher::new();
        client_ip.hash(&mut hasher);
        let index = (hasher.finish() as usize) % candidates.len();
        candidates[index].id.clone()
    }

    /// Bind a connection to a server.
    ///
    /// Capacity is re-validated here because another assignment may have
    /// landed between `select` and this call. The counter increment and the
    /// mapping insert happen under the same critical section.
    pub fn assign(&self, server_id: &str, connection_id: &str) -> Result<(), GateError> {
        let mut servers = self.servers.write().unwrap();
        let node = servers
            .iter_mut()
            .find(|s| s.id == server_id)
            .ok_or_else(|| GateError::UnknownEntity(format!("server {}", server_id)))?;

        let mut assignments = self.assignments.lock().unwrap();

        if assignments.contains_key(connection_id) {
            return Err(GateError::DuplicateEntity(format!(
                "connection {} already assigned",
                connection_id
            )));
        }

        if !node.can_accept() {
            self.agent.increment_metric("assignments_rejected", 1.0);
            return Err(GateError::CapacityExceeded(format!(
                "server {} cannot accept more connections",
                server_id
            )));
        }

        node.current_connections += 1;
        assignments.insert(connection_id.to_string(), server_id.to_string());

        debug!(connection_id = %connection_id, server_id = %server_id, "Assigned connection");
        self.agent.increment_metric("assignments_total", 1.0);
        Ok(())
    }

    /// Unbind a connection from a server; no-op if either id is unknown.
    ///
    /// The node counter is only decremented when the recorded mapping
    /// actually pointed at this server, keeping the one-decrement-per-assign
    /// invariant under caller misuse.
    pub fn release(&self, server_id: &str, connection_id: &str) {
        let mut servers = self.servers.write().unwrap();
        let mut assignments = self.assignments.lock().unwrap();

        match assignments.get(connection_id) {
            Some(mapped) if mapped == server_id => {
                assignments.remove(connection_id);
            }
            _ => return,
        }

        if let Some(node) = servers.iter_mut().find(|s| s.id == server_id) {
            node.current_connections = node.current_connections.saturating_sub(1);
        }

        debug!(connection_id = %connection_id, server_id = %server_id, "Released connection");
    }

    /// Look up which server a connection is bound to
    pub fn assignment(&self, connection_id: &str) -> Option<String> {
        self.assignments.lock().unwrap().get(connection_id).cloned()
    }

    /// Pushed status from a backend node: gauges, health flag, and a fresh
    /// staleness timestamp
    pub fn update_status(&self, server_id: &str, cpu_usage: f64, memory_usage: f64, healthy: bool) {
        let mut servers = self.servers.write().unwrap();

        if let Some(node) = servers.iter_mut().find(|s| s.id == server_id) {
            node.cpu_usage = cpu_usage;
            node.memory_usage = memory_usage;
            node.healthy = healthy;
            node.last_status_at = std::time::Instant::now();

            debug!(
                server_id = %server_id,
                cpu = cpu_usage,
                memory = memory_usage,
                healthy = healthy,
                "Updated server status"
            );
        }
    }

    pub fn get_server(&self, server_id: &str) -> Option<ServerNode> {
        self.servers
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id == server_id)
            .cloned()
    }

    pub fn list_servers(&self) -> Vec<ServerNode> {
        self.servers.read().unwrap().clone()
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.write().unwrap() = strategy;
        info!(strategy = %strategy, "Load balancing strategy changed");
    }

    pub fn strategy(&self) -> Strategy {
        *self.strategy.read().unwrap()
    }

    /// Mark every node whose last pushed status is older than `max_age` as
    /// unhealthy, overriding previously pushed health. Returns how many
    /// nodes were demoted.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let mut servers = self.servers.write().unwrap();
        let mut demoted = 0;

        for node in servers.iter_mut() {
            if node.healthy && node.last_status_at.elapsed() > max_age {
                node.healthy = false;
                demoted += 1;
                warn!(
                    server_id = %node.id,
                    "Server marked unhealthy: no status update within {:?}",
                    max_age
                );
            }
        }

        if demoted > 0 {
            self.agent.increment_metric("servers_demoted", demoted as f64);
        }
        demoted
    }

    /// Start the background staleness sweep at the given cadence
    pub fn start_health_sweep(self: &Arc<Self>, interval: Duration) {
        let balancer = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a freshly added
            // fleet is not swept before any status arrives.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !balancer.is_running() {
                    break;
                }
                balancer.sweep_stale(balancer.stale_status_timeout);
            }
        });

        *self.sweep_handle.lock().unwrap() = Some(handle);
        info!(interval = ?interval, "Health sweep started");
    }
}
