//! `ParleyServer` builder and server loop.
//!
//! This is the entry point for running a Parley room server. It ties
//! together all the layers: transport → protocol → session registry →
//! room actors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parley_protocol::{Codec, JsonCodec};
use parley_session::{RegistryConfig, SessionRegistry};
use parley_transport::{Transport, WebSocketTransport};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::handler::handle_connection;
use crate::ParleyError;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) codec: C,
    /// Capacity of each session's outbound queue.
    pub(crate) outbound_buffer: usize,
    /// Close connections that send nothing for this long.
    pub(crate) idle_timeout: Option<Duration>,
    /// Whether a sender gets its own `app` frames back.
    pub(crate) echo_to_sender: bool,
}

/// Builder for configuring and starting a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn run() -> Result<(), ParleyError> {
/// let server = ParleyServer::builder()
///     .bind("0.0.0.0:8080")
///     .outbound_buffer(512)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ParleyServerBuilder {
    bind_addr: String,
    registry_config: RegistryConfig,
    outbound_buffer: usize,
    idle_timeout: Option<Duration>,
    echo_to_sender: bool,
}

impl ParleyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            registry_config: RegistryConfig::default(),
            outbound_buffer: 256,
            idle_timeout: None,
            echo_to_sender: true,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets room capacity and disposal behavior.
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Sets how many frames may queue for one session before broadcasts
    /// start skipping it.
    pub fn outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames.max(1);
        self
    }

    /// Closes connections that stay silent for `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Whether senders receive their own messages. Default: `true`.
    pub fn echo_to_sender(mut self, echo: bool) -> Self {
        self.echo_to_sender = echo;
        self
    }

    /// Binds the listener and builds the server with the JSON codec.
    pub async fn build(self) -> Result<ParleyServer<JsonCodec>, ParleyError> {
        self.build_with_codec(JsonCodec).await
    }

    /// Binds the listener and builds the server with a custom codec.
    pub async fn build_with_codec<C: Codec>(
        self,
        codec: C,
    ) -> Result<ParleyServer<C>, ParleyError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            registry: Arc::new(SessionRegistry::new(self.registry_config)),
            codec,
            outbound_buffer: self.outbound_buffer,
            idle_timeout: self.idle_timeout,
            echo_to_sender: self.echo_to_sender,
        });

        Ok(ParleyServer { transport, state })
    }
}

impl Default for ParleyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Parley room server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct ParleyServer<C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl ParleyServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> ParleyServerBuilder {
        ParleyServerBuilder::new()
    }
}

impl<C: Codec> ParleyServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry every connection handler shares.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), ParleyError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` completes, then shuts down:
    ///
    /// 1. stop accepting
    /// 2. drain every room (members get a `leave-ack`)
    /// 3. let each connection flush its queue and close
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), ParleyError>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handlers = JoinSet::new();
        tokio::pin!(signal);

        tracing::info!(addr = ?self.transport.local_addr().ok(), "Parley server running");

        loop {
            tokio::select! {
                () = &mut signal => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        let stop = stop_rx.clone();
                        handlers.spawn(async move {
                            if let Err(e) =
                                handle_connection(conn, state, stop).await
                            {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            }
        }

        tracing::info!("Parley server shutting down");
        let rooms = self.state.registry.shutdown().await;
        let _ = stop_tx.send(true);
        while handlers.join_next().await.is_some() {}
        self.transport.shutdown().await?;
        tracing::info!(rooms, "Parley server stopped");
        Ok(())
    }
}
