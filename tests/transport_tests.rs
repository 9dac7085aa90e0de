//! Integration tests for the WebSocket transport and the gateway flow

use futures_util::{SinkExt, StreamExt};
use gamegate::balancer::{LoadBalancer, Strategy};
use gamegate::gateway;
use gamegate::session::ConnectionManager;
use gamegate::transport::{TransportEvent, TransportServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

async fn start_server() -> (
    Arc<TransportServer>,
    mpsc::UnboundedReceiver<TransportEvent>,
    SocketAddr,
    broadcast::Sender<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (server, event_rx) = TransportServer::new(Duration::from_secs(5));
    let server = Arc::new(server);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = server.serve(listener, shutdown_rx).await;
        });
    }

    (server, event_rx, addr, shutdown_tx)
}

async fn connect(
    addr: SocketAddr,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .expect("client failed to connect");
    stream
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_connection_lifecycle() {
    let (server, mut events, addr, _shutdown) = start_server().await;

    let mut client = connect(addr).await;

    let id = match next_event(&mut events).await {
        TransportEvent::Connected { id, .. } => id,
        other => panic!("expected Connected, got {:?}", other),
    };
    assert!(server.has_connection(&id));
    assert_eq!(server.connection_count(), 1);

    // Client to server
    client.send(Message::Text("hello".into())).await.unwrap();
    match next_event(&mut events).await {
        TransportEvent::Message { id: msg_id, text } => {
            assert_eq!(msg_id, id);
            assert_eq!(text, "hello");
        }
        other => panic!("expected Message, got {:?}", other),
    }

    // Server to client
    server.send_to(&id, "welcome").unwrap();
    let frame = timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::Text("welcome".into()));

    // Peer-initiated close fires exactly one Disconnected, after the
    // registry entry is gone
    client.close(None).await.unwrap();
    match next_event(&mut events).await {
        TransportEvent::Disconnected { id: gone } => {
            assert_eq!(gone, id);
            assert!(!server.has_connection(&id));
        }
        other => panic!("expected Disconnected, got {:?}", other),
    }
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_broadcast_reaches_all_clients() {
    let (server, mut events, addr, _shutdown) = start_server().await;

    let mut client_a = connect(addr).await;
    let mut client_b = connect(addr).await;

    for _ in 0..2 {
        match next_event(&mut events).await {
            TransportEvent::Connected { .. } => {}
            other => panic!("expected Connected, got {:?}", other),
        }
    }

    assert_eq!(server.broadcast("tick"), 2);

    for client in [&mut client_a, &mut client_b] {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text("tick".into()));
    }
}

#[tokio::test]
async fn test_server_initiated_close() {
    let (server, mut events, addr, _shutdown) = start_server().await;

    let mut client = connect(addr).await;
    let id = match next_event(&mut events).await {
        TransportEvent::Connected { id, .. } => id,
        other => panic!("expected Connected, got {:?}", other),
    };

    assert!(server.close_connection(&id));

    // Client sees the close frame and the stream ends
    let mut saw_close = false;
    while let Ok(Some(frame)) = timeout(Duration::from_secs(2), client.next()).await {
        if matches!(frame, Ok(Message::Close(_))) {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close);

    match next_event(&mut events).await {
        TransportEvent::Disconnected { id: gone } => {
            assert_eq!(gone, id);
            assert!(!server.has_connection(&id));
        }
        other => panic!("expected Disconnected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_gateway_routes_and_releases_sessions() {
    let (server, event_rx, addr, _shutdown) = start_server().await;

    let sessions = Arc::new(ConnectionManager::new(10));
    sessions.start();
    let balancer = Arc::new(LoadBalancer::new(
        Strategy::LeastConnections,
        Duration::from_secs(300),
    ));
    balancer.start();
    balancer.add_server("game-1", "127.0.0.1", 9001, 100).unwrap();

    {
        let server = Arc::clone(&server);
        let sessions = Arc::clone(&sessions);
        let balancer = Arc::clone(&balancer);
        tokio::spawn(async move {
            gateway::run(event_rx, server, sessions, balancer).await;
        });
    }

    let mut client = connect(addr).await;

    // Admitted and routed; ids start at conn-1 for a fresh server
    assert!(
        wait_until(Duration::from_secs(2), || sessions.active_count() == 1).await,
        "session was not admitted"
    );
    assert_eq!(balancer.assignment("conn-1").as_deref(), Some("game-1"));
    assert_eq!(
        balancer.get_server("game-1").unwrap().current_connections,
        1
    );

    // Message traffic feeds the byte counters
    client.send(Message::Text("ping".into())).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            sessions
                .get_connection("conn-1")
                .map(|r| r.bytes_received == 4)
                .unwrap_or(false)
        })
        .await,
        "received bytes were not recorded"
    );

    // Disconnect removes the session and releases the node binding
    client.close(None).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || sessions.active_count() == 0).await,
        "session was not removed"
    );
    assert!(wait_until(Duration::from_secs(2), || {
        balancer.get_server("game-1").unwrap().current_connections == 0
    })
    .await);
    assert!(balancer.assignment("conn-1").is_none());
}

#[tokio::test]
async fn test_gateway_closes_unroutable_connections() {
    let (server, event_rx, addr, _shutdown) = start_server().await;

    let sessions = Arc::new(ConnectionManager::new(10));
    sessions.start();
    // Empty fleet: every admission fails routing and is closed right away
    let balancer = Arc::new(LoadBalancer::new(
        Strategy::LeastConnections,
        Duration::from_secs(300),
    ));
    balancer.start();

    {
        let server = Arc::clone(&server);
        let sessions = Arc::clone(&sessions);
        let balancer = Arc::clone(&balancer);
        tokio::spawn(async move {
            gateway::run(event_rx, server, sessions, balancer).await;
        });
    }

    let mut client = connect(addr).await;

    // Server closes the connection; the client stream ends
    let mut saw_close = false;
    while let Ok(Some(frame)) = timeout(Duration::from_secs(2), client.next()).await {
        if matches!(frame, Ok(Message::Close(_))) {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close);

    assert!(
        wait_until(Duration::from_secs(2), || {
            sessions.active_count() == 0 && server.connection_count() == 0
        })
        .await
    );
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let (server, mut events, addr, shutdown) = start_server().await;

    let mut client = connect(addr).await;
    match next_event(&mut events).await {
        TransportEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {:?}", other),
    }

    shutdown.send(()).unwrap();

    let mut saw_close = false;
    while let Ok(Some(frame)) = timeout(Duration::from_secs(2), client.next()).await {
        if matches!(frame, Ok(Message::Close(_))) {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close);

    assert!(wait_until(Duration::from_secs(2), || server.connection_count() == 0).await);
}
