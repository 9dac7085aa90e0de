//! Per-Connection State and Outbound Handle

use crate::error::GateError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Lifecycle of a single WebSocket connection. Transitions only move
/// forward; there is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Handle to one live connection: its state machine and the outbound
/// channel drained by the writer half of the socket task
pub struct TransportConnection {
    pub id: String,
    pub peer_addr: SocketAddr,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Message>,
}

impl TransportConnection {
    pub fn new(
        id: impl Into<String>,
        peer_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id: id.into(),
            peer_addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Connecting -> Open; false if the handshake already lost a race with
    /// a close
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move into Closing. Returns true only for the first caller, which
    /// makes close idempotent between local and peer initiation.
    pub fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < ConnectionState::Closing as u8 {
                    Some(ConnectionState::Closing as u8)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Queue a text frame for the writer half. Rejected unless the
    /// connection is currently open.
    pub fn send_text(&self, text: &str) -> Result<(), GateError> {
        if !self.is_open() {
            return Err(GateError::Transport(format!(
                "connection {} is not open",
                self.id
            )));
        }

        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| GateError::Transport(format!("connection {} writer is gone", self.id)))
    }

    /// Queue an arbitrary frame, bypassing the open check. Used for control
    /// frames (pong, close) that are valid outside Open.
    pub fn send_message(&self, message: Message) -> Result<(), GateError> {
        self.outbound
            .send(message)
            .map_err(|_| GateError::Transport(format!("connection {} writer is gone", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (TransportConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        (TransportConnection::new("conn-1", addr, tx), rx)
    }

    #[test]
    fn test_state_machine_moves_forward() {
        let (conn, _rx) = connection();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert!(conn.mark_open());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(!conn.mark_open());

        assert!(conn.begin_close());
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_begin_close_is_first_caller_only() {
        let (conn, _rx) = connection();
        conn.mark_open();

        assert!(conn.begin_close());
        assert!(!conn.begin_close());

        conn.mark_closed();
        assert!(!conn.begin_close());
    }

    #[test]
    fn test_send_text_requires_open() {
        let (conn, mut rx) = connection();

        assert!(matches!(
            conn.send_text("hello"),
            Err(GateError::Transport(_))
        ));

        conn.mark_open();
        conn.send_text("hello").unwrap();
        assert!(matches!(rx.try_recv(), Ok(Message::Text(_))));

        conn.begin_close();
        assert!(conn.send_text("late").is_err());
    }
}
