//! # Parley
//!
//! Realtime room messaging over WebSockets.
//!
//! A [`ParleyServer`] hosts named rooms. Each connection becomes a session
//! that can be in at most one room at a time; every message sent to a room
//! is delivered to its members in the order the room received it. Rooms
//! are created on first join and disposed once they have been empty for
//! the configured grace period.
//!
//! On the other end, a [`ChatClient`] is the handle a UI talks to: join a
//! room, send and receive messages, leave. It rides a self-healing link
//! that reconnects with exponential backoff and re-joins the last room.
//!
//! ```text
//! ChatClient ── Link ──► WebSocketTransport ─► handler ─► SessionRegistry ─► room actors
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ParleyServer::builder().bind("127.0.0.1:8080").build().await?;
//! tokio::spawn(server.run());
//!
//! let client =
//!     ChatClient::connect("ws://127.0.0.1:8080", ClientConfig::default())
//!         .await?;
//! client.on_message(|msg| println!("{}: {}", msg.author, msg.text));
//! client.join_room("lobby").await?;
//! client.send_message(ChatMessage::new("hi all", "alice", 1_700_000_000_000))?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod handler;
mod server;

pub use client::{ChatClient, ClientConfig, HandleState, SendPolicy};
pub use error::{ClientError, JoinError, ParleyError};
pub use server::{ParleyServer, ParleyServerBuilder};

pub use parley_protocol as protocol;
pub use parley_room as room;
pub use parley_session as session;
pub use parley_transport as transport;

/// Everything needed to run a server or drive a client.
pub mod prelude {
    pub use crate::{
        ChatClient, ClientConfig, ClientError, HandleState, JoinError,
        ParleyError, ParleyServer, ParleyServerBuilder, SendPolicy,
    };
    pub use parley_protocol::{
        ChatMessage, Codec, Envelope, ErrorBody, FrameKind, JsonCodec,
        Payload, RoomId, SessionId,
    };
    pub use parley_room::{RoomConfig, RoomInfo};
    pub use parley_session::{RegistryConfig, SessionError, SessionRegistry};
    pub use parley_transport::{ConnectionError, ReconnectPolicy};
}
