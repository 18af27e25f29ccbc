//! The session registry: every session and every room on one server.
//!
//! The registry is an explicit object, created at server start and shared
//! by `Arc` with every connection handler. It owns two maps:
//!
//! - sessions, keyed by [`SessionId`], each remembering its current room
//! - rooms, keyed by [`RoomId`], each a handle to a running room actor
//!
//! Rooms are created on first join and disposed once empty. Whether a room
//! is empty is decided by the room actor itself, so a join that reaches
//! the actor before the dispose check keeps the room alive. A join that
//! loses that race sees the actor gone and retries against a fresh room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parley_protocol::{ChatMessage, Envelope, RoomId, SessionId};
use parley_room::{
    spawn_room, BroadcastReport, MemberSender, RoomError, RoomHandle, RoomInfo,
};
use tokio::sync::Mutex;

use crate::{RegistryConfig, Session, SessionError};

/// How many times a join is retried when its room is disposed under it.
const JOIN_ATTEMPTS: usize = 3;

#[derive(Debug)]
struct RoomEntry {
    handle: RoomHandle,
    /// Distinguishes successive rooms created under the same id, so a
    /// stale disposal never removes the room that replaced it.
    generation: u64,
}

type RoomMap = Mutex<HashMap<RoomId, RoomEntry>>;

/// Tracks every session and routes them into rooms.
#[derive(Debug)]
pub struct SessionRegistry {
    config: RegistryConfig,
    next_session: AtomicU64,
    next_generation: AtomicU64,
    closed: AtomicBool,
    sessions: Mutex<HashMap<SessionId, Session>>,
    /// Shared with disposal timers, which outlive the call that armed them.
    rooms: Arc<RoomMap>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            next_session: AtomicU64::new(1),
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            sessions: Mutex::new(HashMap::new()),
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Creates a session for a freshly accepted connection.
    ///
    /// `sender` is the connection's outbound queue; rooms push frames
    /// into it while the session is a member.
    pub async fn register(&self, sender: MemberSender) -> SessionId {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.sessions
            .lock()
            .await
            .insert(id, Session::new(id, sender));
        tracing::info!(session_id = %id, "session registered");
        id
    }

    /// Puts the session into `room_id`, creating the room if needed.
    ///
    /// A session already in another room leaves it first. Joining the
    /// room the session is already in succeeds without changing anything.
    /// Either way the session's queue receives a `join-ack` before any
    /// traffic from the room.
    ///
    /// # Errors
    /// - [`SessionError::InvalidRoomId`] for an empty id
    /// - [`SessionError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`SessionError::UnknownSession`] if the session isn't registered
    /// - [`SessionError::RoomFull`] if the room is at capacity
    /// - [`SessionError::RoomDisposed`] if the room vanished on every attempt
    /// - [`SessionError::Backlogged`] if the session's queue had no space
    ///   for the `join-ack`
    pub async fn join_or_create(
        &self,
        session_id: SessionId,
        room_id: RoomId,
    ) -> Result<RoomInfo, SessionError> {
        if room_id.is_empty() {
            return Err(SessionError::InvalidRoomId);
        }
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }

        let (sender, current) = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?;
            (session.sender.clone(), session.room_id.clone())
        };

        match current {
            Some(current) if current == room_id => {
                if let Some(info) = self.membership(&room_id, session_id).await
                {
                    let ack = Envelope::join_ack(room_id, session_id);
                    if sender.send(ack).await.is_err() {
                        return Err(SessionError::UnknownSession(session_id));
                    }
                    return Ok(info);
                }
                // The room went away under us (teardown); join afresh.
                self.set_room(session_id, None).await;
            }
            Some(_) => {
                self.leave(session_id).await?;
            }
            None => {}
        }

        for attempt in 1..=JOIN_ATTEMPTS {
            let (handle, generation) = self.get_or_create(&room_id).await?;
            match handle.join(session_id, sender.clone()).await {
                Ok(info) => {
                    if !self.set_room(session_id, Some(room_id.clone())).await {
                        // Disconnected while the join was in flight.
                        self.abandon_join(&room_id, handle, generation, session_id)
                            .await;
                        return Err(SessionError::UnknownSession(session_id));
                    }
                    return Ok(info);
                }
                Err(RoomError::RoomFull(_)) => {
                    return Err(SessionError::RoomFull(room_id));
                }
                Err(RoomError::Saturated(..)) => {
                    // A room created for this join would otherwise linger empty.
                    self.dispose_when_idle(room_id, handle, generation).await;
                    return Err(SessionError::Backlogged(session_id));
                }
                Err(RoomError::Unavailable(_)) => {
                    tracing::debug!(
                        %room_id,
                        %session_id,
                        attempt,
                        "room disposed during join, retrying"
                    );
                    remove_room(&self.rooms, &room_id, generation).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(SessionError::RoomDisposed(room_id))
    }

    /// Takes the session out of its room. Returns the room it left, or
    /// `None` if it wasn't in one. Calling it again is a no-op.
    ///
    /// If the room is left empty, it is disposed after the configured
    /// grace period (immediately, before returning, when the grace is
    /// zero).
    ///
    /// # Errors
    /// [`SessionError::UnknownSession`] if the session isn't registered.
    pub async fn leave(
        &self,
        session_id: SessionId,
    ) -> Result<Option<RoomId>, SessionError> {
        let room_id = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?;
            match session.room_id.take() {
                Some(room_id) => room_id,
                None => return Ok(None),
            }
        };

        if let Some((handle, generation)) = self.room_entry(&room_id).await {
            match handle.leave(session_id).await {
                Ok(0) => {
                    self.dispose_when_idle(room_id.clone(), handle, generation)
                        .await;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(
                        %room_id,
                        %session_id,
                        %err,
                        "leave on stale membership"
                    );
                }
            }
        }

        Ok(Some(room_id))
    }

    /// Sends an application message from `session_id` to its room.
    ///
    /// With `exclude_sender`, the sender doesn't get its own message back.
    ///
    /// # Errors
    /// - [`SessionError::UnknownSession`] if the session isn't registered
    /// - [`SessionError::NotInRoom`] if the session isn't in a room
    pub async fn broadcast(
        &self,
        session_id: SessionId,
        message: ChatMessage,
        exclude_sender: bool,
    ) -> Result<BroadcastReport, SessionError> {
        let room_id = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?
                .room_id
                .clone()
                .ok_or(SessionError::NotInRoom(session_id))?
        };
        let (handle, _) = self
            .room_entry(&room_id)
            .await
            .ok_or(SessionError::NotInRoom(session_id))?;

        let envelope = Envelope::app(room_id, Some(session_id), message);
        handle
            .broadcast(envelope, exclude_sender.then_some(session_id))
            .await
            .map_err(|_| SessionError::NotInRoom(session_id))
    }

    /// Leaves the session's room and forgets the session. Returns the room
    /// it was in, if any.
    pub async fn disconnect(&self, session_id: SessionId) -> Option<RoomId> {
        let left = self.leave(session_id).await.ok().flatten();
        if self.sessions.lock().await.remove(&session_id).is_some() {
            tracing::info!(%session_id, "session closed");
        }
        left
    }

    /// Tears down every room and refuses further joins.
    ///
    /// Every member is sent a `leave-ack` before its room stops. Sessions
    /// stay registered (their connections are still open) but are no
    /// longer in any room. Returns how many rooms were drained.
    pub async fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let drained: Vec<_> = self.rooms.lock().await.drain().collect();
        let count = drained.len();
        for (room_id, entry) in drained {
            match entry.handle.shutdown().await {
                Ok(evicted) => {
                    tracing::debug!(
                        %room_id,
                        evicted = evicted.len(),
                        "room drained"
                    );
                }
                Err(err) => {
                    tracing::debug!(%room_id, %err, "room already stopped");
                }
            }
        }

        for session in self.sessions.lock().await.values_mut() {
            session.room_id = None;
        }

        tracing::info!(rooms = count, "registry shut down");
        count
    }

    // -- Introspection ----------------------------------------------------

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Ids of all live rooms, sorted.
    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<_> = self.rooms.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn room_info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        let (handle, _) = self.room_entry(room_id).await?;
        handle.info().await.ok()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// The room a session is in. `None` if it isn't in one or isn't
    /// registered.
    pub async fn session_room(&self, session_id: SessionId) -> Option<RoomId> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .and_then(|s| s.room_id.clone())
    }

    // -- Internals --------------------------------------------------------

    async fn room_entry(&self, room_id: &RoomId) -> Option<(RoomHandle, u64)> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map(|e| (e.handle.clone(), e.generation))
    }

    /// Room info if `session_id` is currently a member of `room_id`.
    async fn membership(
        &self,
        room_id: &RoomId,
        session_id: SessionId,
    ) -> Option<RoomInfo> {
        let (handle, _) = self.room_entry(room_id).await?;
        let info = handle.info().await.ok()?;
        info.members.contains(&session_id).then_some(info)
    }

    /// Returns `false` if the session is no longer registered.
    async fn set_room(
        &self,
        session_id: SessionId,
        room_id: Option<RoomId>,
    ) -> bool {
        match self.sessions.lock().await.get_mut(&session_id) {
            Some(session) => {
                session.room_id = room_id;
                true
            }
            None => false,
        }
    }

    /// Looks up the room, spawning it if absent. Runs under the room map
    /// lock, so two callers never create the same id twice.
    async fn get_or_create(
        &self,
        room_id: &RoomId,
    ) -> Result<(RoomHandle, u64), SessionError> {
        let mut rooms = self.rooms.lock().await;
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        if let Some(entry) = rooms.get(room_id) {
            if !entry.handle.is_closed() {
                return Ok((entry.handle.clone(), entry.generation));
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = spawn_room(room_id.clone(), self.config.room.clone());
        rooms.insert(
            room_id.clone(),
            RoomEntry {
                handle: handle.clone(),
                generation,
            },
        );
        tracing::info!(%room_id, "room created");
        Ok((handle, generation))
    }

    /// Undoes a room-level join whose session vanished before it was
    /// recorded. The room is disposed if that left it empty.
    async fn abandon_join(
        &self,
        room_id: &RoomId,
        handle: RoomHandle,
        generation: u64,
        session_id: SessionId,
    ) {
        match handle.leave(session_id).await {
            Ok(0) => {
                self.dispose_when_idle(room_id.clone(), handle, generation)
                    .await;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(%room_id, %session_id, %err, "abandoned join already gone");
            }
        }
    }

    async fn dispose_when_idle(
        &self,
        room_id: RoomId,
        handle: RoomHandle,
        generation: u64,
    ) {
        let grace = self.config.disposal_grace;
        if grace.is_zero() {
            dispose_if_empty(&self.rooms, room_id, handle, generation).await;
            return;
        }

        tracing::debug!(%room_id, ?grace, "room empty, disposal scheduled");
        let rooms = Arc::clone(&self.rooms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            dispose_if_empty(&rooms, room_id, handle, generation).await;
        });
    }
}

/// Asks the room to stop if it is still empty, and forgets it if it did.
async fn dispose_if_empty(
    rooms: &RoomMap,
    room_id: RoomId,
    handle: RoomHandle,
    generation: u64,
) {
    match handle.dispose_if_empty().await {
        Ok(false) => {
            tracing::debug!(%room_id, "room reoccupied, keeping it");
        }
        Ok(true) | Err(_) => {
            if remove_room(rooms, &room_id, generation).await {
                tracing::info!(%room_id, "room disposed");
            }
        }
    }
}

/// Removes the map entry only if it still belongs to `generation`.
async fn remove_room(rooms: &RoomMap, room_id: &RoomId, generation: u64) -> bool {
    let mut rooms = rooms.lock().await;
    match rooms.get(room_id) {
        Some(entry) if entry.generation == generation => {
            rooms.remove(room_id);
            true
        }
        _ => false,
    }
}

// =========================================================================
// Tests
// =========================================================================
