/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening an outbound connection failed.
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}

/// A fatal, non-retryable connection failure.
///
/// Surfaced to the owner of a [`Link`](crate::Link) once the reconnect
/// budget is spent. Carries only owned strings so it can be cloned and
/// handed to every caller that asks after the failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Every attempt allowed by the [`ReconnectPolicy`](crate::ReconnectPolicy)
    /// failed.
    #[error("could not reach {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// The link was closed locally and can no longer carry frames.
    #[error("link closed")]
    Closed,
}
