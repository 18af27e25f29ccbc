//! Room actor: an isolated Tokio task that owns one [`Room`].
//!
//! Each room runs in its own task and is reached only through its command
//! channel, so everything done to one room (joins, leaves, broadcasts)
//! happens in the order the commands arrive, while separate rooms run in
//! parallel.

use parley_protocol::{Envelope, RoomId, SessionId};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::{BroadcastReport, MemberSender, Room, RoomConfig, RoomError, RoomInfo};

/// Commands sent to a room actor through its channel.
///
/// The `oneshot::Sender` in each variant is the reply channel: the caller
/// sends a command and waits for the answer on it. If the actor stops
/// first, the reply sender is dropped and the caller sees
/// [`RoomError::Unavailable`].
enum RoomCommand {
    Join {
        session_id: SessionId,
        sender: MemberSender,
        reply: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },

    /// Replies with the number of members left.
    Leave {
        session_id: SessionId,
        reply: oneshot::Sender<Result<usize, RoomError>>,
    },

    Broadcast {
        envelope: Envelope,
        exclude: Option<SessionId>,
        reply: oneshot::Sender<BroadcastReport>,
    },

    Info {
        reply: oneshot::Sender<RoomInfo>,
    },

    /// Stop if, and only if, nobody is in the room. Replies `true` when
    /// the actor is stopping.
    DisposeIfEmpty {
        reply: oneshot::Sender<bool>,
    },

    /// Evict everyone and stop. Replies with the evicted sessions.
    Shutdown {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Join { .. } => "Join",
            Self::Leave { .. } => "Leave",
            Self::Broadcast { .. } => "Broadcast",
            Self::Info { .. } => "Info",
            Self::DisposeIfEmpty { .. } => "DisposeIfEmpty",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Handle to a running room actor.
///
/// Cheap to clone: it's an `mpsc::Sender` plus the room id.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    /// Adds a member; returns the room info as of right after the join.
    ///
    /// The member's queue gets a `join-ack` ahead of any broadcast it
    /// receives from this room.
    pub async fn join(
        &self,
        session_id: SessionId,
        sender: MemberSender,
    ) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Join {
            session_id,
            sender,
            reply,
        })
        .await?
    }

    /// Removes a member; returns how many are left.
    pub async fn leave(
        &self,
        session_id: SessionId,
    ) -> Result<usize, RoomError> {
        self.request(|reply| RoomCommand::Leave { session_id, reply })
            .await?
    }

    /// Fans `envelope` out to every member except `exclude`.
    pub async fn broadcast(
        &self,
        envelope: Envelope,
        exclude: Option<SessionId>,
    ) -> Result<BroadcastReport, RoomError> {
        self.request(|reply| RoomCommand::Broadcast {
            envelope,
            exclude,
            reply,
        })
        .await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Stops the actor if the room is empty at the moment the command is
    /// processed. Returns `true` if it stopped.
    pub async fn dispose_if_empty(&self) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::DisposeIfEmpty { reply })
            .await
    }

    /// Evicts every member (each gets a `leave-ack`) and stops the actor.
    /// Commands queued before this one are still processed.
    pub async fn shutdown(&self) -> Result<Vec<SessionId>, RoomError> {
        self.request(|reply| RoomCommand::Shutdown { reply }).await
    }
}

/// The internal actor state. Runs inside a Tokio task.
struct RoomActor {
    room: Room,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    /// Adds the member and queues its `join-ack`. A member whose queue is
    /// full is removed again, so no one is a member without having been
    /// told. A closed queue is left to the session's disconnect cleanup.
    fn join(
        &mut self,
        session_id: SessionId,
        sender: MemberSender,
    ) -> Result<RoomInfo, RoomError> {
        let room_id = self.room.id().clone();
        let ack_to = sender.clone();
        self.room.add_member(session_id, sender)?;

        let ack = Envelope::join_ack(room_id.clone(), session_id);
        if let Err(TrySendError::Full(_)) = ack_to.try_send(ack) {
            tracing::warn!(%room_id, %session_id, "member queue full, undoing join");
            let _ = self.room.remove_member(session_id);
            return Err(RoomError::Saturated(session_id, room_id));
        }

        tracing::info!(
            %room_id,
            %session_id,
            members = self.room.len(),
            "member joined"
        );
        Ok(self.room.info())
    }

    /// Processes commands until disposed, shut down, or every handle is
    /// dropped.
    async fn run(mut self) {
        let room_id = self.room.id().clone();
        tracing::info!(%room_id, "room actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Join {
                    session_id,
                    sender,
                    reply,
                } => {
                    let result = self.join(session_id, sender);
                    let _ = reply.send(result);
                }
                RoomCommand::Leave { session_id, reply } => {
                    let result = self
                        .room
                        .remove_member(session_id)
                        .map(|()| self.room.len());
                    if result.is_ok() {
                        tracing::info!(
                            %room_id,
                            %session_id,
                            members = self.room.len(),
                            "member left"
                        );
                    }
                    let _ = reply.send(result);
                }
                RoomCommand::Broadcast {
                    envelope,
                    exclude,
                    reply,
                } => {
                    let report = self.room.broadcast(&envelope, exclude);
                    tracing::debug!(
                        %room_id,
                        delivered = report.delivered.len(),
                        skipped = report.skipped.len(),
                        "broadcast"
                    );
                    let _ = reply.send(report);
                }
                RoomCommand::Info { reply } => {
                    let _ = reply.send(self.room.info());
                }
                RoomCommand::DisposeIfEmpty { reply } => {
                    let empty = self.room.is_empty();
                    let _ = reply.send(empty);
                    if empty {
                        tracing::debug!(%room_id, "room empty, disposing");
                        break;
                    }
                }
                RoomCommand::Shutdown { reply } => {
                    let evicted = self.room.evict_all();
                    tracing::info!(
                        %room_id,
                        evicted = evicted.len(),
                        "room shutting down"
                    );
                    let _ = reply.send(evicted);
                    break;
                }
            }
        }

        tracing::info!(%room_id, "room actor stopped");
    }
}

/// Spawns a new room actor task and returns a handle to it.
pub fn spawn_room(room_id: RoomId, config: RoomConfig) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let actor = RoomActor {
        room: Room::new(room_id.clone(), config),
        receiver: rx,
    };
    tokio::spawn(actor.run());
    RoomHandle { room_id, sender: tx }
}
