//! Error types for the session layer.

use parley_protocol::{ErrorBody, RoomId, SessionId};
use parley_room::RoomError;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Room ids must be non-empty.
    #[error("room id must not be empty")]
    InvalidRoomId,

    /// The target room is at capacity.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The room kept disappearing under the join (disposal or teardown)
    /// and the retry budget ran out.
    #[error("room {0} was disposed")]
    RoomDisposed(RoomId),

    /// No session is registered under this id. Either it never connected
    /// or it already disconnected.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The session isn't in any room.
    #[error("session {0} is not in a room")]
    NotInRoom(SessionId),

    /// The session's outbound queue was full when the `join-ack` was due,
    /// so the join was undone.
    #[error("session {0} is backlogged")]
    Backlogged(SessionId),

    /// The registry has been shut down and takes no new joins.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// A room-level error with no more specific mapping.
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl SessionError {
    /// The error frame code a client sees for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidRoomId | Self::UnknownSession(_) | Self::Room(_) => {
                ErrorBody::BAD_REQUEST
            }
            Self::RoomFull(_) => ErrorBody::ROOM_FULL,
            Self::RoomDisposed(_) => ErrorBody::ROOM_DISPOSED,
            Self::NotInRoom(_) => ErrorBody::NOT_IN_ROOM,
            Self::Backlogged(_) => ErrorBody::BACKLOGGED,
            Self::ShuttingDown => ErrorBody::SHUTTING_DOWN,
        }
    }
}
