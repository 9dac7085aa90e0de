//! WebSocket Accept Loop and Connection Registry

use crate::transport::connection::TransportConnection;
use crate::error::GateError;
use crate::Result;
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Events emitted to the application layer, one channel for all
/// connections. Ordering is preserved per connection because each
/// connection task holds the only outstanding read on its socket.
#[derive(Debug)]
pub enum TransportEvent {
    Connected { id: String, peer_addr: SocketAddr },
    Message { id: String, text: String },
    Disconnected { id: String },
}

/// Owns the listener and the registry of live connections
pub struct TransportServer {
    connections: RwLock<HashMap<String, Arc<TransportConnection>>>,
    next_id: AtomicU64,
    handshake_timeout: Duration,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportServer {
    /// Returns the server together with the receiving end of its event
    /// channel
    pub fn new(handshake_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let server = Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            handshake_timeout,
            event_tx,
        };

        (server, event_rx)
    }

    /// Bind and run the accept loop until a shutdown signal arrives.
    ///
    /// Accepted sockets are handed to their own task immediately so the
    /// loop re-arms without waiting on any handshake. A bind failure aborts
    /// startup.
    pub async fn run(
        self: Arc<Self>,
        bind_addr: SocketAddr,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        info!("Transport server listening on {}", bind_addr);
        self.serve(listener, shutdown_rx).await
    }

    /// Accept loop over an already bound listener
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Transport server stopping accept loop");
                    break;
                }
            }
        }

        self.close_all();
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let ws_stream = match timeout(
            self.handshake_timeout,
            tokio_tungstenite::accept_async(stream),
        )
        .await
        {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!(peer = %peer_addr, "WebSocket handshake failed: {}", e);
                return;
            }
            Err(_) => {
                warn!(peer = %peer_addr, "WebSocket handshake timed out");
                return;
            }
        };

        let id = format!("conn-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let conn = Arc::new(TransportConnection::new(&id, peer_addr, outbound_tx));

        self.connections
            .write()
            .unwrap()
            .insert(id.clone(), Arc::clone(&conn));
        conn.mark_open();

        debug!(connection_id = %id, peer = %peer_addr, "Connection established");
        let _ = self.event_tx.send(TransportEvent::Connected {
            id: id.clone(),
            peer_addr,
        });

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        // Writer half: drains the outbound queue until the queue closes or
        // the socket dies, then finishes the close handshake.
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if ws_sink.send(message).await.is_err() || is_close {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader half: the single outstanding read for this connection
        while let Some(frame) = ws_read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let _ = self.event_tx.send(TransportEvent::Message {
                        id: id.clone(),
                        text: text.to_string(),
                    });
                }
                Ok(Message::Binary(data)) => {
                    debug!(connection_id = %id, bytes = data.len(), "Ignoring binary frame");
                }
                Ok(Message::Ping(payload)) => {
                    let _ = conn.send_message(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %id, "Peer initiated close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(connection_id = %id, "Connection error: {}", e);
                    break;
                }
            }
        }

        // Teardown runs exactly once per connection task. The registry entry
        // goes away before the Disconnected event is emitted, so consumers
        // never observe a disconnected id as live. The queued close frame
        // also ends the writer half; without it the writer would wait on
        // the outbound channel forever.
        if conn.begin_close() {
            let _ = conn.send_message(Message::Close(None));
        }
        self.connections.write().unwrap().remove(&id);
        conn.mark_closed();

        let _ = writer.await;
        let _ = self.event_tx.send(TransportEvent::Disconnected { id: id.clone() });
        debug!(connection_id = %id, "Connection closed");
    }

    /// Send a text frame to one connection
    pub fn send_to(&self, id: &str, text: &str) -> Result<(), GateError> {
        let connections = self.connections.read().unwrap();
        let conn = connections
            .get(id)
            .ok_or_else(|| GateError::UnknownEntity(format!("connection {}", id)))?;
        conn.send_text(text)
    }

    /// Send a text frame to every open connection; returns how many
    /// received it. Connections mid-close are skipped.
    pub fn broadcast(&self, text: &str) -> usize {
        let connections = self.connections.read().unwrap();
        let mut delivered = 0;

        for conn in connections.values() {
            if conn.is_open() && conn.send_text(text).is_ok() {
                delivered += 1;
            }
        }

        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn has_connection(&self, id: &str) -> bool {
        self.connections.read().unwrap().contains_key(id)
    }

    /// Initiate a close from the server side; the connection task finishes
    /// the teardown. Returns false for an unknown id.
    pub fn close_connection(&self, id: &str) -> bool {
        let connections = self.connections.read().unwrap();
        match connections.get(id) {
            Some(conn) => {
                if conn.begin_close() {
                    let _ = conn.send_message(Message::Close(None));
                }
                true
            }
            None => false,
        }
    }

    /// Queue a close frame to every live connection
    pub fn close_all(&self) {
        let connections = self.connections.read().unwrap();
        info!("Closing {} live connections", connections.len());

        for conn in connections.values() {
            if conn.begin_close() {
                let _ = conn.send_message(Message::Close(None));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_to_unknown_connection() {
        let (server, _rx) = TransportServer::new(Duration::from_secs(5));
        assert_eq!(
            server.send_to("conn-404", "hello"),
            Err(GateError::UnknownEntity("connection conn-404".to_string()))
        );
    }

    #[test]
    fn test_broadcast_skips_non_open() {
        let (server, _rx) = TransportServer::new(Duration::from_secs(5));
        assert_eq!(server.broadcast("hello"), 0);

        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        let open = Arc::new(TransportConnection::new("conn-1", addr, tx_a));
        open.mark_open();
        let closing = Arc::new(TransportConnection::new("conn-2", addr, tx_b));
        closing.mark_open();
        closing.begin_close();

        {
            let mut connections = server.connections.write().unwrap();
            connections.insert("conn-1".to_string(), open);
            connections.insert("conn-2".to_string(), closing);
        }

        assert_eq!(server.broadcast("hello"), 1);
        assert!(matches!(rx_a.try_recv(), Ok(Message::Text(_))));
    }

    #[test]
    fn test_close_connection_unknown_is_false() {
        let (server, _rx) = TransportServer::new(Duration::from_secs(5));
        assert!(!server.close_connection("conn-404"));
    }
}
