//! Room configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by every room a registry creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Maximum number of members. A join beyond this fails with
    /// [`RoomError::RoomFull`](crate::RoomError::RoomFull).
    pub max_members: usize,

    /// Capacity of the actor's command queue. When it fills up, callers
    /// wait (bounded channel backpressure).
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_members: 64,
            command_buffer: 64,
        }
    }
}

impl RoomConfig {
    /// Sets the member cap.
    #[must_use]
    pub fn with_max_members(mut self, max_members: usize) -> Self {
        self.max_members = max_members;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.max_members, 64);
        assert_eq!(config.command_buffer, 64);
    }

    #[test]
    fn test_room_config_with_max_members() {
        let config = RoomConfig::default().with_max_members(2);
        assert_eq!(config.max_members, 2);
        assert_eq!(config.command_buffer, 64);
    }
}
