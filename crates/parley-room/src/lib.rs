//! Rooms for Parley.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! member list and fans application frames out to them.
//!
//! # Key types
//!
//! - [`Room`]: the synchronous member list and broadcast logic
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`spawn_room`]: start a room actor
//! - [`RoomConfig`]: capacity and queue sizing

mod actor;
mod config;
mod error;
mod room;

pub use actor::{spawn_room, RoomHandle};
pub use config::RoomConfig;
pub use error::RoomError;
pub use room::{BroadcastReport, MemberSender, Room, RoomInfo};
