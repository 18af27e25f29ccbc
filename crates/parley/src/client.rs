//! Client session handle: one connection, at most one room at a time.
//!
//! [`ChatClient`] wraps a self-healing [`Link`] and tracks which room the
//! client is in:
//!
//! ```text
//!                join_room()               join-ack
//!  Disconnected ────────────► Joining ─────────────► Joined
//!       ▲                        │                     │
//!       │   error / timeout      │                     │ leave_room()
//!       ├────────────────────────┘                     ▼
//!       └──────────────── leave-ack / timeout ─── Leaving
//! ```
//!
//! Joins and leaves queue on one FIFO lock, so at most one transition is
//! in flight. Each runs on its own task: dropping the caller's future
//! does not abort a join that was already sent.
//!
//! A background receive loop owns inbound processing. It settles pending
//! joins and leaves, delivers room messages to the [`on_message`]
//! callback in arrival order, and re-joins the last room after the link
//! reconnects.
//!
//! [`on_message`]: ChatClient::on_message

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use parley_protocol::{
    ChatMessage, Codec, Envelope, FrameKind, JsonCodec, Payload, RoomId,
    SessionId,
};
use parley_transport::{ConnectionError, Link, LinkEvent, ReconnectPolicy};
use tokio::sync::{mpsc, oneshot};

use crate::{ClientError, JoinError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What [`ChatClient::send_message`] does when the handle isn't joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendPolicy {
    /// Silently drop the message.
    #[default]
    Drop,
    /// Return [`ClientError::NotJoined`].
    Reject,
}

/// Configuration for a [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backoff for the initial connect and for reconnects.
    pub reconnect: ReconnectPolicy,
    /// How long to wait for a `join-ack`. Default: 10 s.
    pub join_timeout: Duration,
    /// How long to wait for a `leave-ack` before forcing `Disconnected`.
    /// Default: 5 s.
    pub leave_timeout: Duration,
    pub send_policy: SendPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            join_timeout: Duration::from_secs(10),
            leave_timeout: Duration::from_secs(5),
            send_policy: SendPolicy::Drop,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.send_policy = policy;
        self
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where the handle is in its room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Disconnected,
    Joining,
    Joined,
    Leaving,
}

type MessageCallback = Box<dyn FnMut(ChatMessage) + Send>;

/// The transition waiting on a server reply.
enum Pending {
    Join {
        room_id: RoomId,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

struct Shared {
    state: HandleState,
    /// The room being joined, joined, or left.
    room: Option<RoomId>,
    session_id: Option<SessionId>,
    pending: Option<Pending>,
    /// Room to re-join once the link comes back. Cleared by any explicit
    /// join or leave.
    rejoin: Option<RoomId>,
    connection_error: Option<ConnectionError>,
}

impl Shared {
    /// Fails whatever is in flight and drops back to `Disconnected`.
    fn reset(&mut self) {
        match self.pending.take() {
            Some(Pending::Join { reply, .. }) => {
                let _ = reply.send(Err(JoinError::ConnectionLost));
            }
            Some(Pending::Leave { reply }) => {
                let _ = reply.send(());
            }
            None => {}
        }
        self.state = HandleState::Disconnected;
        self.room = None;
        self.session_id = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<C: Codec> {
    link: Link,
    codec: C,
    config: ClientConfig,
    shared: Mutex<Shared>,
    callback: Mutex<Option<Arc<Mutex<MessageCallback>>>>,
    /// FIFO queue for join/leave transitions.
    ops: Arc<tokio::sync::Mutex<()>>,
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

/// Client-side handle to a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn chat() -> Result<(), ClientError> {
/// let client =
///     ChatClient::connect("ws://127.0.0.1:8080", ClientConfig::default())
///         .await?;
/// client.on_message(|msg| println!("{}: {}", msg.author, msg.text));
/// client.join_room("lobby").await?;
/// client.send_message(ChatMessage::new("hello", "alice", 1_700_000_000_000))?;
/// client.leave_room().await?;
/// # Ok(())
/// # }
/// ```
pub struct ChatClient<C: Codec = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl ChatClient<JsonCodec> {
    /// Connects to `server_url`, retrying per `config.reconnect`.
    ///
    /// # Errors
    /// [`ClientError::Connection`] if the server can't be reached within
    /// the retry budget.
    pub async fn connect(
        server_url: &str,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        Self::connect_with_codec(server_url, config, JsonCodec).await
    }
}

impl<C: Codec> ChatClient<C> {
    /// Like [`connect`](ChatClient::connect), with a custom codec.
    pub async fn connect_with_codec(
        server_url: &str,
        config: ClientConfig,
        codec: C,
    ) -> Result<Self, ClientError> {
        let (link, events) =
            Link::connect(server_url, config.reconnect.clone()).await?;

        let inner = Arc::new(Inner {
            link,
            codec,
            config,
            shared: Mutex::new(Shared {
                state: HandleState::Disconnected,
                room: None,
                session_id: None,
                pending: None,
                rejoin: None,
                connection_error: None,
            }),
            callback: Mutex::new(None),
            ops: Arc::new(tokio::sync::Mutex::new(())),
        });
        tokio::spawn(receive_loop(Arc::downgrade(&inner), events));

        tracing::info!(url = server_url, "chat client connected");
        Ok(Self { inner })
    }

    /// Joins `room`, creating it on the server if needed.
    ///
    /// Leaves the current room first if joined elsewhere; joining the room
    /// the handle is already in is a no-op. Queues behind any join or
    /// leave already in flight.
    ///
    /// # Errors
    /// - [`ClientError::Join`] if the server refused or didn't answer
    /// - [`ClientError::Connection`] if the link is gone for good
    pub async fn join_room(
        &self,
        room: impl Into<RoomId>,
    ) -> Result<(), ClientError> {
        let room_id = room.into();
        self.inner.check_connection()?;
        self.inner.cancel_rejoin();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _op = Arc::clone(&inner.ops).lock_owned().await;
            inner.join(room_id).await
        })
        .await
        .map_err(|_| ClientError::Aborted)?
    }

    /// Leaves the current room. A no-op when not joined, so calling it
    /// twice is the same as calling it once.
    ///
    /// Waits for the `leave-ack` up to the leave timeout; either way the
    /// handle ends up `Disconnected`.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        self.inner.cancel_rejoin();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _op = Arc::clone(&inner.ops).lock_owned().await;
            inner.leave().await;
        })
        .await
        .map_err(|_| ClientError::Aborted)
    }

    /// Sends a message to the current room.
    ///
    /// When not joined the message is dropped, or rejected with
    /// [`ClientError::NotJoined`] under [`SendPolicy::Reject`].
    ///
    /// # Errors
    /// [`ClientError::Protocol`] if the handle is joined and the message
    /// has empty text.
    pub fn send_message(&self, message: ChatMessage) -> Result<(), ClientError> {
        let room_id = {
            let shared = lock(&self.inner.shared);
            match shared.state {
                HandleState::Joined => shared.room.clone(),
                _ => None,
            }
        };
        let Some(room_id) = room_id else {
            return match self.inner.config.send_policy {
                SendPolicy::Drop => {
                    tracing::debug!("not joined, dropping message");
                    Ok(())
                }
                SendPolicy::Reject => Err(ClientError::NotJoined),
            };
        };

        message.validate()?;
        let frame = self.inner.codec.encode(&Envelope::app(room_id, None, message))?;
        self.inner.link.send(frame)?;
        Ok(())
    }

    /// Registers the callback for inbound room messages, replacing any
    /// earlier one.
    ///
    /// Runs on the receive loop, once per message, in arrival order, and
    /// only while joined. A slow callback delays everything behind it.
    pub fn on_message<F>(&self, callback: F)
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        let callback: MessageCallback = Box::new(callback);
        *lock(&self.inner.callback) = Some(Arc::new(Mutex::new(callback)));
    }

    pub fn state(&self) -> HandleState {
        lock(&self.inner.shared).state
    }

    /// The room the handle is joined to.
    pub fn current_room(&self) -> Option<RoomId> {
        let shared = lock(&self.inner.shared);
        match shared.state {
            HandleState::Joined => shared.room.clone(),
            _ => None,
        }
    }

    /// The server-assigned session id, known once a join succeeds.
    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.inner.shared).session_id
    }

    /// Set once the link has failed for good or been closed.
    pub fn connection_error(&self) -> Option<ConnectionError> {
        lock(&self.inner.shared).connection_error.clone()
    }

    /// Leaves the current room (if any) and closes the link.
    pub async fn close(&self) {
        let _ = self.leave_room().await;
        self.inner.link.close();
    }
}

impl<C: Codec> Drop for ChatClient<C> {
    fn drop(&mut self) {
        self.inner.link.close();
    }
}

// ---------------------------------------------------------------------------
// Transitions (run while holding the op lock)
// ---------------------------------------------------------------------------

impl<C: Codec> Inner<C> {
    fn check_connection(&self) -> Result<(), ClientError> {
        match &lock(&self.shared).connection_error {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    fn cancel_rejoin(&self) {
        lock(&self.shared).rejoin = None;
    }

    fn send_envelope(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let frame = self.codec.encode(envelope)?;
        self.link.send(frame)?;
        Ok(())
    }

    async fn join(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.check_connection()?;

        let (state, current) = {
            let shared = lock(&self.shared);
            (shared.state, shared.room.clone())
        };
        if state == HandleState::Joined {
            if current.as_ref() == Some(&room_id) {
                return Ok(());
            }
            self.leave().await;
        }

        let frame = self.codec.encode(&Envelope::join(room_id.clone()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut shared = lock(&self.shared);
            shared.state = HandleState::Joining;
            shared.room = Some(room_id.clone());
            shared.pending = Some(Pending::Join {
                room_id: room_id.clone(),
                reply: reply_tx,
            });
        }
        if let Err(e) = self.link.send(frame) {
            lock(&self.shared).reset();
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.join_timeout, reply_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(%room_id, "joined room");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                tracing::debug!(%room_id, error = %e, "join failed");
                Err(e.into())
            }
            Ok(Err(_)) => Err(JoinError::ConnectionLost.into()),
            Err(_) => {
                let mut shared = lock(&self.shared);
                // The ack may have landed right as the timer fired.
                if shared.state == HandleState::Joined
                    && shared.room.as_ref() == Some(&room_id)
                {
                    return Ok(());
                }
                if matches!(shared.pending, Some(Pending::Join { .. })) {
                    shared.pending = None;
                }
                shared.state = HandleState::Disconnected;
                shared.room = None;
                tracing::warn!(%room_id, "join timed out");
                Err(JoinError::Timeout(room_id).into())
            }
        }
    }

    async fn leave(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let room_id = {
            let mut shared = lock(&self.shared);
            if shared.state != HandleState::Joined {
                return;
            }
            shared.state = HandleState::Leaving;
            shared.pending = Some(Pending::Leave { reply: reply_tx });
            shared.room.clone()
        };

        let sent = self.send_envelope(&Envelope::leave(room_id.clone()));
        if sent.is_ok()
            && tokio::time::timeout(self.config.leave_timeout, reply_rx)
                .await
                .is_err()
        {
            tracing::warn!(room_id = ?room_id, "leave timed out");
        }

        let mut shared = lock(&self.shared);
        if matches!(shared.pending, Some(Pending::Leave { .. })) {
            shared.pending = None;
        }
        if shared.state == HandleState::Leaving {
            shared.state = HandleState::Disconnected;
            shared.room = None;
        }
        tracing::info!(room_id = ?room_id, "left room");
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// Processes link events until the link is gone or the handle is dropped.
async fn receive_loop<C: Codec>(
    weak: Weak<Inner<C>>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match event {
            LinkEvent::Data(data) => inner.on_frame(&data),
            LinkEvent::Lost => inner.on_lost(),
            LinkEvent::Reconnected => inner.on_reconnected(),
            LinkEvent::Failed(err) => {
                tracing::error!(error = %err, "connection failed");
                inner.on_terminated(err);
                break;
            }
            LinkEvent::Closed => {
                inner.on_terminated(ConnectionError::Closed);
                break;
            }
        }
    }
    tracing::debug!("receive loop stopped");
}

impl<C: Codec> Inner<C> {
    fn on_frame(&self, data: &[u8]) {
        let envelope: Envelope = match self.codec.decode(data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(error = %e, "failed to decode frame");
                return;
            }
        };

        match envelope.kind {
            FrameKind::JoinAck => self.on_join_ack(envelope),
            FrameKind::LeaveAck => self.on_leave_ack(envelope),
            FrameKind::Error => self.on_error(envelope),
            FrameKind::App => self.on_app(envelope),
            FrameKind::Join | FrameKind::Leave => {
                tracing::debug!(kind = %envelope.kind, "ignoring client-only frame");
            }
        }
    }

    fn on_join_ack(&self, envelope: Envelope) {
        let Some(room_id) = envelope.room_id else {
            return;
        };
        let mut shared = lock(&self.shared);
        match shared.pending.take() {
            Some(Pending::Join {
                room_id: wanted,
                reply,
            }) if wanted == room_id => {
                // Joined before the caller hears back.
                shared.state = HandleState::Joined;
                shared.room = Some(room_id);
                shared.session_id = envelope.session_id;
                let _ = reply.send(Ok(()));
            }
            other => {
                shared.pending = other;
                let joined_here = shared.state == HandleState::Joined
                    && shared.room.as_ref() == Some(&room_id);
                drop(shared);
                if !joined_here {
                    // Nobody is waiting for this room any more.
                    tracing::debug!(%room_id, "late join-ack, leaving");
                    let _ = self.send_envelope(&Envelope::leave(Some(room_id)));
                }
            }
        }
    }

    fn on_leave_ack(&self, envelope: Envelope) {
        let mut shared = lock(&self.shared);
        let same_room =
            envelope.room_id.is_none() || envelope.room_id == shared.room;
        if !same_room {
            tracing::debug!(room_id = ?envelope.room_id, "ignoring leave-ack for another room");
            return;
        }

        match shared.pending.take() {
            Some(Pending::Leave { reply }) => {
                shared.state = HandleState::Disconnected;
                shared.room = None;
                let _ = reply.send(());
            }
            other => {
                shared.pending = other;
                if shared.state == HandleState::Joined {
                    tracing::info!(room_id = ?shared.room, "removed from room by server");
                    shared.state = HandleState::Disconnected;
                    shared.room = None;
                    shared.rejoin = None;
                }
            }
        }
    }

    fn on_error(&self, envelope: Envelope) {
        let Some(body) = envelope.error_body().cloned() else {
            return;
        };
        let mut shared = lock(&self.shared);
        match shared.pending.take() {
            Some(Pending::Join { room_id, reply })
                if envelope.room_id.as_ref().is_none_or(|r| *r == room_id) =>
            {
                shared.state = HandleState::Disconnected;
                shared.room = None;
                let _ = reply.send(Err(JoinError::from_error_body(room_id, &body)));
            }
            other => {
                shared.pending = other;
                tracing::debug!(code = body.code, message = %body.message, "server error");
            }
        }
    }

    fn on_app(&self, envelope: Envelope) {
        let for_us = {
            let shared = lock(&self.shared);
            shared.state == HandleState::Joined
                && envelope.room_id.is_some()
                && envelope.room_id == shared.room
        };
        if !for_us {
            tracing::debug!(room_id = ?envelope.room_id, "dropping message for a room we're not in");
            return;
        }
        let Payload::Message(message) = envelope.payload else {
            return;
        };

        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            (lock(&callback))(message);
        }
    }

    fn on_lost(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == HandleState::Joined {
            shared.rejoin = shared.room.clone();
        }
        shared.reset();
        tracing::warn!(rejoin = ?shared.rejoin, "link lost");
    }

    /// Re-joins the room held before the link dropped, queued like any
    /// other join.
    fn on_reconnected(self: &Arc<Self>) {
        if lock(&self.shared).rejoin.is_none() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _op = Arc::clone(&inner.ops).lock_owned().await;
            // An explicit join or leave issued meanwhile clears this.
            let Some(room_id) = lock(&inner.shared).rejoin.clone() else {
                return;
            };
            match inner.join(room_id.clone()).await {
                Ok(()) => {
                    tracing::info!(%room_id, "rejoined room after reconnect");
                    lock(&inner.shared).rejoin = None;
                }
                Err(ClientError::Join(JoinError::ConnectionLost)) => {
                    // Keep the target for the next reconnect.
                }
                Err(e) => {
                    tracing::warn!(%room_id, error = %e, "rejoin failed");
                    lock(&inner.shared).rejoin = None;
                }
            }
        });
    }

    fn on_terminated(&self, err: ConnectionError) {
        let mut shared = lock(&self.shared);
        shared.reset();
        shared.rejoin = None;
        shared.connection_error.get_or_insert(err);
    }
}
