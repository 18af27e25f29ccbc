//! Session registry for Parley.
//!
//! This crate tracks every connected session and routes it into rooms:
//!
//! 1. **Sessions**: one per accepted connection ([`Session`])
//! 2. **Routing**: join-or-create, leave, and broadcast by room id
//!    ([`SessionRegistry`])
//! 3. **Disposal**: empty rooms are torn down after a grace period
//!    ([`RegistryConfig`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Connection handler (above)  ← one task per socket, owns a SessionId
//!     ↕
//! Session registry (this crate)  ← sessions and the rooms they are in
//!     ↕
//! Room actors (below)  ← membership and broadcast fan-out
//! ```

mod error;
mod registry;
mod session;

pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{RegistryConfig, Session};
