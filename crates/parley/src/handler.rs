//! Per-connection handler: session registration and frame routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Register a session, with a bounded outbound queue
//!   2. Spawn a writer that drains the queue onto the socket
//!   3. Loop: receive envelopes → dispatch join / leave / app
//!   4. On exit: disconnect the session, flush the queue, close
//!
//! Everything sent to the client goes through the outbound queue, so
//! control replies and room broadcasts reach the socket in one order.

use std::sync::Arc;

use parley_protocol::{Codec, Envelope, ErrorBody, FrameKind, Payload, SessionId};
use parley_session::SessionRegistry;
use parley_transport::{Connection, TransportError, WebSocketConnection};
use tokio::sync::{mpsc, watch};

use crate::server::ServerState;
use crate::ParleyError;

/// Drop guard that disconnects a session when the handler exits.
///
/// The normal path calls [`release`](Self::release) and awaits the
/// disconnect. If the handler is aborted or panics instead, `Drop` spawns
/// it as a fire-and-forget task.
struct SessionGuard {
    session_id: SessionId,
    registry: Option<Arc<SessionRegistry>>,
}

impl SessionGuard {
    async fn release(mut self) {
        if let Some(registry) = self.registry.take() {
            registry.disconnect(self.session_id).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            let session_id = self.session_id;
            tokio::spawn(async move {
                registry.disconnect(session_id).await;
            });
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ParleyError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();

    let (tx, rx) = mpsc::channel(state.outbound_buffer);
    let session_id = state.registry.register(tx.clone()).await;
    let guard = SessionGuard {
        session_id,
        registry: Some(Arc::clone(&state.registry)),
    };
    tracing::debug!(%conn_id, %session_id, "connection attached to session");

    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        Arc::clone(&state),
        session_id,
        rx,
    ));

    let result = read_loop(&conn, &state, session_id, &tx, &mut stop).await;

    // Rooms drop their clone of `tx` on leave, so once the session is
    // gone the writer sees the queue close after flushing it.
    guard.release().await;
    drop(tx);
    let _ = writer.await;
    let _ = conn.close().await;
    tracing::debug!(%conn_id, %session_id, "connection closed");

    result
}

async fn read_loop<C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<C>,
    session_id: SessionId,
    tx: &mpsc::Sender<Envelope>,
    stop: &mut watch::Receiver<bool>,
) -> Result<(), ParleyError> {
    loop {
        let data = tokio::select! {
            _ = stop.changed() => {
                tracing::debug!(%session_id, "server stopping, closing connection");
                return Ok(());
            }
            frame = next_frame(conn, state, session_id) => match frame? {
                Some(data) => data,
                None => return Ok(()),
            },
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%session_id, error = %e, "failed to decode envelope");
                reply(
                    tx,
                    Envelope::error(
                        None,
                        ErrorBody::BAD_REQUEST,
                        format!("malformed frame: {e}"),
                    ),
                )
                .await;
                continue;
            }
        };

        if let Err(e) = envelope.validate() {
            reply(
                tx,
                Envelope::error(
                    envelope.room_id,
                    ErrorBody::BAD_REQUEST,
                    e.to_string(),
                ),
            )
            .await;
            continue;
        }

        dispatch(state, session_id, envelope, tx).await;
    }
}

/// Receives the next frame, applying the idle timeout if one is set.
/// `Ok(None)` means the connection is done.
async fn next_frame<C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<C>,
    session_id: SessionId,
) -> Result<Option<Vec<u8>>, TransportError> {
    let frame = match state.idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, conn.recv()).await {
            Ok(frame) => frame,
            Err(_) => {
                tracing::info!(%session_id, "connection idle, closing");
                return Ok(None);
            }
        },
        None => conn.recv().await,
    };

    match frame {
        Ok(Some(data)) => Ok(Some(data)),
        Ok(None) => {
            tracing::info!(%session_id, "connection closed cleanly");
            Ok(None)
        }
        Err(e) => {
            tracing::debug!(%session_id, error = %e, "recv error");
            Err(e)
        }
    }
}

/// Routes one validated frame from the client.
async fn dispatch<C: Codec>(
    state: &ServerState<C>,
    session_id: SessionId,
    envelope: Envelope,
    tx: &mpsc::Sender<Envelope>,
) {
    let registry = &state.registry;

    match envelope.kind {
        FrameKind::Join => {
            let Some(room_id) = envelope.room_id else {
                return;
            };
            // On success the room queues the join-ack itself, ahead of
            // any broadcast.
            if let Err(e) =
                registry.join_or_create(session_id, room_id.clone()).await
            {
                tracing::debug!(%session_id, %room_id, error = %e, "join rejected");
                reply(tx, Envelope::error(Some(room_id), e.code(), e.to_string()))
                    .await;
            }
        }

        FrameKind::Leave => {
            let current = registry.session_room(session_id).await;
            // A leave naming some other room is stale (the client already
            // moved on); acknowledge it without touching membership.
            let left = match &envelope.room_id {
                Some(room_id) if current.as_ref() != Some(room_id) => {
                    tracing::debug!(%session_id, %room_id, "ignoring stale leave");
                    None
                }
                _ => registry.leave(session_id).await.unwrap_or_else(|e| {
                    tracing::debug!(%session_id, error = %e, "leave failed");
                    None
                }),
            };
            reply(tx, Envelope::leave_ack(left.or(envelope.room_id), session_id))
                .await;
        }

        FrameKind::App => {
            let room_id = envelope.room_id;
            let Payload::Message(message) = envelope.payload else {
                return;
            };
            if room_id.is_none()
                || registry.session_room(session_id).await != room_id
            {
                reply(
                    tx,
                    Envelope::error(
                        room_id,
                        ErrorBody::NOT_IN_ROOM,
                        "not a member of that room",
                    ),
                )
                .await;
                return;
            }
            if let Err(e) = registry
                .broadcast(session_id, message, !state.echo_to_sender)
                .await
            {
                reply(tx, Envelope::error(room_id, e.code(), e.to_string()))
                    .await;
            }
        }

        FrameKind::JoinAck | FrameKind::LeaveAck | FrameKind::Error => {
            tracing::debug!(
                %session_id,
                kind = %envelope.kind,
                "ignoring server-only frame from client"
            );
        }
    }
}

/// Drains the session's outbound queue onto the socket.
async fn write_loop<C: Codec>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<C>>,
    session_id: SessionId,
    mut rx: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let bytes = match state.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::debug!(%session_id, error = %e, "send failed, stopping writer");
            break;
        }
    }
}

/// Queues a control frame for this connection.
async fn reply(tx: &mpsc::Sender<Envelope>, envelope: Envelope) {
    let _ = tx.send(envelope).await;
}
