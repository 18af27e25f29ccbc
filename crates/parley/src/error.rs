//! Error types for the Parley server and client handle.

use parley_protocol::{ErrorBody, ProtocolError, RoomId};
use parley_room::RoomError;
use parley_session::SessionError;
use parley_transport::{ConnectionError, TransportError};

/// Top-level server error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registry-level error (unknown session, room full, shutdown).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error.
    #[error(transparent)]
    Room(#[from] RoomError),
}

/// Why a [`ChatClient::join_room`](crate::ChatClient::join_room) failed.
///
/// All of these are recoverable: the handle is back in `Disconnected` and
/// can try again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("room {0} was disposed during the join")]
    RoomDisposed(RoomId),

    /// Any other error frame the server answered the join with.
    #[error("join rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// No `join-ack` arrived within the configured join timeout.
    #[error("join of room {0} timed out")]
    Timeout(RoomId),

    /// The link dropped while the join was in flight.
    #[error("connection lost during join")]
    ConnectionLost,
}

impl JoinError {
    /// Maps the error frame a server sent in reply to a join.
    pub fn from_error_body(room_id: RoomId, body: &ErrorBody) -> Self {
        match body.code {
            ErrorBody::ROOM_FULL => Self::RoomFull(room_id),
            ErrorBody::ROOM_DISPOSED => Self::RoomDisposed(room_id),
            code => Self::Rejected {
                code,
                message: body.message.clone(),
            },
        }
    }
}

/// Errors surfaced by the [`ChatClient`](crate::ChatClient) handle.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The link is gone for good: retries exhausted or closed locally.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Join(#[from] JoinError),

    /// `send_message` while not joined, under
    /// [`SendPolicy::Reject`](crate::SendPolicy::Reject).
    #[error("not joined to a room")]
    NotJoined,

    /// The message or frame couldn't be encoded or was invalid.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The task running the operation died before finishing.
    #[error("operation aborted")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::SessionId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectFailed {
            url: "ws://gone".into(),
            reason: "refused".into(),
        };
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Transport(_)));
        assert!(parley_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let parley_err: ParleyError = SessionError::ShuttingDown.into();
        assert!(matches!(parley_err, ParleyError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::NotMember(SessionId(1), RoomId::new("a"));
        let parley_err: ParleyError = err.into();
        assert!(matches!(parley_err, ParleyError::Room(_)));
    }

    #[test]
    fn test_join_error_from_room_full_frame() {
        let body = ErrorBody::new(ErrorBody::ROOM_FULL, "room lobby is full");
        assert_eq!(
            JoinError::from_error_body(RoomId::new("lobby"), &body),
            JoinError::RoomFull(RoomId::new("lobby"))
        );
    }

    #[test]
    fn test_join_error_from_disposed_frame() {
        let body = ErrorBody::new(ErrorBody::ROOM_DISPOSED, "gone");
        assert_eq!(
            JoinError::from_error_body(RoomId::new("x"), &body),
            JoinError::RoomDisposed(RoomId::new("x"))
        );
    }

    #[test]
    fn test_join_error_from_other_frame_keeps_code() {
        let body = ErrorBody::new(ErrorBody::SHUTTING_DOWN, "draining");
        assert_eq!(
            JoinError::from_error_body(RoomId::new("x"), &body),
            JoinError::Rejected {
                code: 503,
                message: "draining".into()
            }
        );
    }

    #[test]
    fn test_client_error_wraps_connection_error() {
        let err: ClientError = ConnectionError::Closed.into();
        assert_eq!(err.to_string(), "link closed");
    }
}
