//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields,
    /// an unknown frame `type`, or a truncated frame.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded fine but breaks a protocol rule, e.g. an `app`
    /// frame with empty text or a `join` without a room id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
