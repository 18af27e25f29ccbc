//! Error types for the room layer.

use parley_protocol::{RoomId, SessionId};

/// Errors that can occur during room operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room is at capacity.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The session is already a member of this room.
    #[error("session {0} already in room {1}")]
    AlreadyMember(SessionId, RoomId),

    /// The session is not a member of this room.
    #[error("session {0} not in room {1}")]
    NotMember(SessionId, RoomId),

    /// The session's outbound queue had no room for the `join-ack`, so
    /// the join was undone.
    #[error("session {0} is backlogged, join to room {1} undone")]
    Saturated(SessionId, RoomId),

    /// The room's actor has stopped (disposed or shut down) and can no
    /// longer take commands.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}
