//! Gateway Event Pump
//!
//! Ties the transport layer to the session registry and the balancer:
//! admission on connect, activity and byte accounting on message, release
//! and removal on disconnect. One task runs this loop for the lifetime of
//! the process; it never blocks on registry operations.

use crate::balancer::LoadBalancer;
use crate::session::ConnectionManager;
use crate::transport::{TransportEvent, TransportServer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Consume transport events until the channel closes.
///
/// A connection that cannot be admitted or routed is closed right away;
/// its later `Disconnected` event is then a harmless no-op against the
/// registries.
pub async fn run(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    transport: Arc<TransportServer>,
    sessions: Arc<ConnectionManager>,
    balancer: Arc<LoadBalancer>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected { id, peer_addr } => {
                let client_ip = peer_addr.ip().to_string();

                if let Err(e) = sessions.admit(&id, &client_ip) {
                    warn!(connection_id = %id, "Admission rejected: {}", e);
                    transport.close_connection(&id);
                    continue;
                }

                let Some(server_id) = balancer.select(&client_ip) else {
                    warn!(connection_id = %id, "No healthy server available");
                    sessions.remove(&id);
                    transport.close_connection(&id);
                    continue;
                };

                match balancer.assign(&server_id, &id) {
                    Ok(()) => {
                        info!(connection_id = %id, server_id = %server_id, "Session routed");
                    }
                    Err(e) => {
                        warn!(
                            connection_id = %id,
                            server_id = %server_id,
                            "Assignment failed: {}", e
                        );
                        sessions.remove(&id);
                        transport.close_connection(&id);
                    }
                }
            }
            TransportEvent::Message { id, text } => {
                sessions.touch(&id);
                sessions.record_received(&id, text.len() as u64);
            }
            TransportEvent::Disconnected { id } => {
                if let Some(server_id) = balancer.assignment(&id) {
                    balancer.release(&server_id, &id);
                }
                sessions.remove(&id);
            }
        }
    }
}
