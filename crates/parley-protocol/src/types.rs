//! Core protocol types for Parley's wire format.
//!
//! Every frame exchanged between a client handle and the server is an
//! [`Envelope`]. The envelope's `type` tells the receiver whether it is a
//! control frame (join, leave, their acknowledgements, errors) or an
//! application frame carrying a chat [`ChatMessage`].
//!
//! JSON shape of a frame:
//!
//! ```text
//! {
//!   "type": "app",            ← FrameKind, kebab-case
//!   "roomId": "lobby",        ← RoomId or null
//!   "sessionId": 7,           ← SessionId or null
//!   "payload": {              ← ChatMessage, ErrorBody, or null
//!     "text": "hi",
//!     "author": "alice",
//!     "timestamp": 1700000000000
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one logical room.
///
/// Room ids are opaque, case-sensitive strings chosen by clients: joining
/// `"lobby"` and `"Lobby"` puts you in two different rooms. On the wire
/// the id is a plain JSON string (`#[serde(transparent)]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps a room name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the room name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty name, which no room may use.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RoomId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identifies one server-side session, i.e. one live connection.
///
/// Assigned by the server when the connection is accepted and reported
/// back to the client in every `join-ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Application payload
// ---------------------------------------------------------------------------

/// A chat message, exactly as the UI layer produces and consumes it.
///
/// `isEditing` is optional on the wire. An absent flag stays absent after
/// a decode/encode cycle (it is never rewritten to `false` or `null`), so
/// the UI sees back precisely what it sent.
///
/// `timestamp` is epoch milliseconds supplied by the sending client. The
/// server treats it as untrusted data and never reorders by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message body. Must be non-empty.
    pub text: String,

    /// Display identifier of the author.
    pub author: String,

    /// Set by the UI while the author is editing a previous message.
    #[serde(
        rename = "isEditing",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_editing: Option<bool>,

    /// Client-supplied epoch milliseconds.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Builds a message without the editing flag.
    pub fn new(
        text: impl Into<String>,
        author: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            is_editing: None,
            timestamp,
        }
    }

    /// Sets the editing flag.
    #[must_use]
    pub fn editing(mut self, is_editing: bool) -> Self {
        self.is_editing = Some(is_editing);
        self
    }

    /// Checks the invariants the server enforces before broadcasting.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] if `text` is empty.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.text.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "message text must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors on the wire
// ---------------------------------------------------------------------------

/// Body of an `error` frame. Codes follow HTTP conventions; see
/// [`ErrorBody::BAD_REQUEST`] and friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl ErrorBody {
    /// Malformed or out-of-place frame.
    pub const BAD_REQUEST: u16 = 400;
    /// The session is not in the room the frame targets.
    pub const NOT_IN_ROOM: u16 = 404;
    /// The room is at capacity.
    pub const ROOM_FULL: u16 = 409;
    /// The room was disposed while the join was in flight.
    pub const ROOM_DISPOSED: u16 = 410;
    /// The session's outbound queue is backed up; retry once it drains.
    pub const BACKLOGGED: u16 = 429;
    /// The server is draining and accepts no new joins.
    pub const SHUTTING_DOWN: u16 = 503;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// FrameKind / Payload / Envelope
// ---------------------------------------------------------------------------

/// The `type` discriminator of a frame.
///
/// | kind        | direction        | payload       |
/// |-------------|------------------|---------------|
/// | `join`      | client → server  | none          |
/// | `join-ack`  | server → client  | none          |
/// | `leave`     | client → server  | none          |
/// | `leave-ack` | server → client  | none          |
/// | `app`       | both             | `ChatMessage` |
/// | `error`     | server → client  | `ErrorBody`   |
///
/// A server-initiated `leave-ack` (no preceding `leave`) means the room
/// dropped the session, e.g. during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameKind {
    Join,
    JoinAck,
    Leave,
    LeaveAck,
    App,
    Error,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Join => "join",
            Self::JoinAck => "join-ack",
            Self::Leave => "leave",
            Self::LeaveAck => "leave-ack",
            Self::App => "app",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// What a frame carries besides its routing fields.
///
/// Untagged: the envelope's `type` already says which variant to expect,
/// and [`Envelope::validate`] checks that the two agree. `Empty` encodes
/// as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Message(ChatMessage),
    Error(ErrorBody),
    #[default]
    Empty,
}

/// The top-level frame. Every message on the wire is an `Envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Control or application frame.
    #[serde(rename = "type")]
    pub kind: FrameKind,

    /// The room this frame concerns, if any.
    #[serde(default)]
    pub room_id: Option<RoomId>,

    /// For acks, the recipient's session. For `app` frames relayed by the
    /// server, the sender's session.
    #[serde(default)]
    pub session_id: Option<SessionId>,

    #[serde(default)]
    pub payload: Payload,
}

impl Envelope {
    fn control(
        kind: FrameKind,
        room_id: Option<RoomId>,
        session_id: Option<SessionId>,
    ) -> Self {
        Self {
            kind,
            room_id,
            session_id,
            payload: Payload::Empty,
        }
    }

    /// Client request to join (or create) `room_id`.
    pub fn join(room_id: RoomId) -> Self {
        Self::control(FrameKind::Join, Some(room_id), None)
    }

    /// Server confirmation that `session_id` is now in `room_id`.
    pub fn join_ack(room_id: RoomId, session_id: SessionId) -> Self {
        Self::control(FrameKind::JoinAck, Some(room_id), Some(session_id))
    }

    /// Client request to leave its current room.
    pub fn leave(room_id: Option<RoomId>) -> Self {
        Self::control(FrameKind::Leave, room_id, None)
    }

    /// Server confirmation that `session_id` is no longer in a room.
    pub fn leave_ack(room_id: Option<RoomId>, session_id: SessionId) -> Self {
        Self::control(FrameKind::LeaveAck, room_id, Some(session_id))
    }

    /// An application message for `room_id`.
    pub fn app(
        room_id: RoomId,
        session_id: Option<SessionId>,
        message: ChatMessage,
    ) -> Self {
        Self {
            kind: FrameKind::App,
            room_id: Some(room_id),
            session_id,
            payload: Payload::Message(message),
        }
    }

    /// An error report, optionally scoped to a room.
    pub fn error(
        room_id: Option<RoomId>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: FrameKind::Error,
            room_id,
            session_id: None,
            payload: Payload::Error(ErrorBody::new(code, message)),
        }
    }

    /// Checks that the frame is well-formed for its kind.
    ///
    /// - `join` and `app` need a non-empty `roomId`.
    /// - `app` needs a valid [`ChatMessage`] payload.
    /// - `error` needs an [`ErrorBody`] payload.
    /// - Other kinds carry no payload.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] describing the first violation.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let needs_room = matches!(self.kind, FrameKind::Join | FrameKind::App);
        if needs_room && self.room_id.as_ref().is_none_or(RoomId::is_empty) {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} frame requires a room id",
                self.kind
            )));
        }

        match (self.kind, &self.payload) {
            (FrameKind::App, Payload::Message(msg)) => msg.validate(),
            (FrameKind::Error, Payload::Error(_)) => Ok(()),
            (FrameKind::App | FrameKind::Error, _) => {
                Err(ProtocolError::InvalidMessage(format!(
                    "{} frame has the wrong payload",
                    self.kind
                )))
            }
            (_, Payload::Empty) => Ok(()),
            (kind, _) => Err(ProtocolError::InvalidMessage(format!(
                "{kind} frame must not carry a payload"
            ))),
        }
    }

    /// Returns the chat message if this is an `app` frame.
    pub fn message(&self) -> Option<&ChatMessage> {
        match &self.payload {
            Payload::Message(msg) => Some(msg),
            _ => None,
        }
    }

    /// Returns the error body if this is an `error` frame.
    pub fn error_body(&self) -> Option<&ErrorBody> {
        match &self.payload {
            Payload::Error(body) => Some(body),
            _ => None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
