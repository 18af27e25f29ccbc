//! Session types: the server's record of one connection.

use std::time::Duration;

use parley_protocol::{RoomId, SessionId};
use parley_room::{MemberSender, RoomConfig};

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`SessionRegistry`](crate::SessionRegistry).
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Applied to every room the registry creates.
    pub room: RoomConfig,

    /// How long an empty room lingers before it is disposed. A join that
    /// lands in the meantime keeps the room alive.
    ///
    /// Default: zero, meaning the room is disposed before the leave that
    /// emptied it returns.
    pub disposal_grace: Duration,
}

impl RegistryConfig {
    #[must_use]
    pub fn with_room(mut self, room: RoomConfig) -> Self {
        self.room = room;
        self
    }

    #[must_use]
    pub fn with_disposal_grace(mut self, grace: Duration) -> Self {
        self.disposal_grace = grace;
        self
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single connection's session.
///
/// Created when the transport accepts a connection, destroyed on
/// disconnect. A session is in at most one room at a time.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,

    /// The room this session is in, if any.
    pub room_id: Option<RoomId>,

    /// Outbound queue of the connection. Rooms hold a clone of it while
    /// the session is a member.
    pub sender: MemberSender,
}

impl Session {
    pub fn new(id: SessionId, sender: MemberSender) -> Self {
        Self {
            id,
            room_id: None,
            sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_registry_config_default_disposes_immediately() {
        let config = RegistryConfig::default();
        assert_eq!(config.disposal_grace, Duration::ZERO);
        assert_eq!(config.room, RoomConfig::default());
    }

    #[test]
    fn test_registry_config_setters() {
        let config = RegistryConfig::default()
            .with_room(RoomConfig::default().with_max_members(2))
            .with_disposal_grace(Duration::from_secs(5));
        assert_eq!(config.room.max_members, 2);
        assert_eq!(config.disposal_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_new_session_is_not_in_a_room() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(SessionId(1), tx);
        assert_eq!(session.id, SessionId(1));
        assert!(session.room_id.is_none());
    }
}
