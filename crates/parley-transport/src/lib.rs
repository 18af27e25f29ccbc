//! Transport layer for Parley.
//!
//! Server side, the [`Transport`] and [`Connection`] traits abstract over
//! the network protocol; [`WebSocketTransport`] is the shipped
//! implementation. Client side, a [`Link`] wraps one outbound connection
//! and keeps it alive with exponential backoff ([`ReconnectPolicy`]),
//! reporting what happened through [`LinkEvent`]s.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport and [`Link`] via
//!   `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod backoff;
mod error;
#[cfg(feature = "websocket")]
mod link;
#[cfg(feature = "websocket")]
mod websocket;

pub use backoff::{Backoff, ReconnectPolicy};
pub use error::{ConnectionError, TransportError};
#[cfg(feature = "websocket")]
pub use link::{connect_with_retry, Link, LinkEvent};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single duplex connection that can send and receive frames.
///
/// Frames sent on one connection arrive in the order they were sent.
/// Implementations must let `send` and `recv` run concurrently: a task
/// parked in `recv` never holds up a writer.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
