//! Wire protocol for Parley.
//!
//! This crate defines what travels between a chat client handle and the
//! room server:
//!
//! - **Types** ([`Envelope`], [`FrameKind`], [`ChatMessage`], [`RoomId`],
//!   [`SessionId`]): the frames and the values inside them.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong doing so.
//!
//! The protocol layer knows nothing about sockets or rooms:
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session registry / client handle
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ChatMessage, Envelope, ErrorBody, FrameKind, Payload, RoomId, SessionId,
};
