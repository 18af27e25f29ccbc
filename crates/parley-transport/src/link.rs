//! Client-side link: one logical connection to a server that survives
//! transient network failures.
//!
//! A [`Link`] is a thin handle over a background driver task. Outbound
//! frames go through an unbounded FIFO queue drained by that single task,
//! so frames sent on one link reach the socket in order. Everything the
//! driver observes comes back as a [`LinkEvent`].
//!
//! ```text
//!            send()                        Data / Lost / Reconnected
//!   Link ───────────────► driver task ───────────────────────────────► owner
//!                             │  ▲                  Failed / Closed
//!                   socket ◄──┘  └── reconnect with backoff
//! ```
//!
//! The driver never replays anything after a reconnect: frames queued
//! while the socket was down are discarded, and the owner decides what to
//! re-issue once it sees [`LinkEvent::Reconnected`].

use tokio::sync::mpsc;

use crate::{
    Connection, ConnectionError, ReconnectPolicy, WebSocketConnection,
};

/// Something the link driver wants its owner to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame arrived from the server.
    Data(Vec<u8>),
    /// The socket dropped; the driver is reconnecting. Any server-side
    /// state tied to the old connection is gone.
    Lost,
    /// A fresh socket is up after a [`LinkEvent::Lost`].
    Reconnected,
    /// Reconnecting failed for good. No further events follow.
    Failed(ConnectionError),
    /// The link was closed locally. No further events follow.
    Closed,
}

enum LinkCommand {
    Send(Vec<u8>),
    Close,
}

/// Handle to a self-healing client connection.
///
/// Dropping every clone of the handle closes the link.
#[derive(Debug, Clone)]
pub struct Link {
    url: String,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link {
    /// Connects to `url`, retrying per `policy`, and starts the driver.
    ///
    /// Returns the handle plus the receiving end of the event stream.
    ///
    /// # Errors
    /// [`ConnectionError::RetriesExhausted`] if no attempt succeeded.
    pub async fn connect(
        url: &str,
        policy: ReconnectPolicy,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), ConnectionError>
    {
        let conn = connect_with_retry(url, &policy).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            url: url.to_string(),
            policy,
            commands: cmd_rx,
            events: event_tx,
        };
        tokio::spawn(driver.run(conn));

        Ok((
            Self {
                url: url.to_string(),
                commands: cmd_tx,
            },
            event_rx,
        ))
    }

    /// Queues a frame for delivery.
    ///
    /// Frames are written in call order. A frame queued while the link
    /// is reconnecting is dropped.
    ///
    /// # Errors
    /// [`ConnectionError::Closed`] once the driver has stopped.
    pub fn send(&self, data: Vec<u8>) -> Result<(), ConnectionError> {
        self.commands
            .send(LinkCommand::Send(data))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Asks the driver to close the socket and stop. Idempotent.
    pub fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }

    /// Returns `true` once the driver task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// The server URL this link connects to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Opens a WebSocket connection to `url`, retrying with backoff.
///
/// The first attempt is immediate; each failure consumes one retry from
/// `policy` and sleeps for the backoff delay.
///
/// # Errors
/// [`ConnectionError::RetriesExhausted`] once the budget is spent.
pub async fn connect_with_retry(
    url: &str,
    policy: &ReconnectPolicy,
) -> Result<WebSocketConnection, ConnectionError> {
    let mut backoff = policy.backoff();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match WebSocketConnection::connect(url).await {
            Ok(conn) => return Ok(conn),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!(
                        url,
                        attempt = attempts,
                        ?delay,
                        error = %e,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(ConnectionError::RetriesExhausted {
                        url: url.to_string(),
                        attempts,
                        last_error: e.to_string(),
                    });
                }
            },
        }
    }
}

/// Why the connected phase of the driver ended.
enum Outcome {
    Closed,
    Lost(String),
}

struct Driver {
    url: String,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Driver {
    async fn run(mut self, mut conn: WebSocketConnection) {
        tracing::debug!(url = %self.url, id = %conn.id(), "link up");

        loop {
            match self.pump(&conn).await {
                Outcome::Closed => {
                    let _ = conn.close().await;
                    let _ = self.events.send(LinkEvent::Closed);
                    tracing::debug!(url = %self.url, "link closed");
                    return;
                }
                Outcome::Lost(reason) => {
                    tracing::warn!(url = %self.url, %reason, "link lost, reconnecting");
                    if self.events.send(LinkEvent::Lost).is_err() {
                        return;
                    }
                    match self.reconnect().await {
                        Some(Ok(fresh)) => {
                            tracing::info!(url = %self.url, id = %fresh.id(), "link reconnected");
                            conn = fresh;
                            if self.events.send(LinkEvent::Reconnected).is_err() {
                                let _ = conn.close().await;
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(url = %self.url, error = %e, "link failed");
                            let _ = self.events.send(LinkEvent::Failed(e));
                            return;
                        }
                        None => {
                            let _ = self.events.send(LinkEvent::Closed);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Shuttles frames between the queue and the socket until one side
    /// goes away.
    async fn pump(&mut self, conn: &WebSocketConnection) -> Outcome {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(LinkCommand::Send(data)) => {
                        if let Err(e) = conn.send(&data).await {
                            return Outcome::Lost(e.to_string());
                        }
                    }
                    Some(LinkCommand::Close) | None => return Outcome::Closed,
                },
                frame = conn.recv() => match frame {
                    Ok(Some(data)) => {
                        if self.events.send(LinkEvent::Data(data)).is_err() {
                            return Outcome::Closed;
                        }
                    }
                    Ok(None) => return Outcome::Lost("closed by peer".into()),
                    Err(e) => return Outcome::Lost(e.to_string()),
                },
            }
        }
    }

    /// Runs the retry loop while still honoring a local close.
    ///
    /// Returns `None` if the owner closed the link meanwhile. Frames
    /// queued during the outage are dropped here.
    async fn reconnect(
        &mut self,
    ) -> Option<Result<WebSocketConnection, ConnectionError>> {
        let url = self.url.clone();
        let policy = self.policy.clone();
        let attempt = connect_with_retry(&url, &policy);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => return Some(result),
                cmd = self.commands.recv() => match cmd {
                    Some(LinkCommand::Send(data)) => {
                        tracing::debug!(bytes = data.len(), "dropping frame queued while link is down");
                    }
                    Some(LinkCommand::Close) | None => return None,
                },
            }
        }
    }
}
