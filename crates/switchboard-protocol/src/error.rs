//! Error types for the protocol layer.
//!
//! The `Display` text of these errors is what the relay sends back to the
//! offending peer in an `error` frame, so it is written for humans on the
//! other end of the socket.

/// Errors that can occur while encoding, decoding, or validating a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The frame is not valid JSON, or a field has the wrong JSON type.
    #[cfg(feature = "json")]
    #[error("invalid message format: {0}")]
    Decode(serde_json::Error),

    /// The frame has no `type` field.
    #[error("message type is required")]
    MissingType,

    /// A field the message type requires is absent or empty.
    #[error("{0} required")]
    MissingField(&'static str),

    /// The `type` field names a message kind the relay does not know.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// An identity component contains characters outside `[A-Za-z0-9_-]`
    /// or is empty.
    #[error(
        "invalid identifier '{0}': use only letters, digits, '_' and '-'"
    )]
    InvalidIdentity(String),

    /// More than `max` bytes arrived without a newline. The pending bytes
    /// were discarded.
    #[error("message too large ({len} bytes pending, limit {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// I/O error surfaced through the framing codec.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
