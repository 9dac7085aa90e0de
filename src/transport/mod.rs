//! WebSocket Transport Layer
//!
//! Accepts TCP connections, upgrades them to WebSocket, and runs one task
//! per connection. Each task owns the single outstanding read on its socket,
//! so delivery within a connection is in-order; there is no ordering across
//! connections. Application code consumes `TransportEvent`s from the channel
//! handed out at construction and talks back through `send_to`/`broadcast`.

pub mod connection;
pub mod server;

pub use connection::{ConnectionState, TransportConnection};
pub use server::{TransportEvent, TransportServer};
