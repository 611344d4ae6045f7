//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A codec converts between Rust types and the bytes of one frame. It does
//! not add or strip the newline terminator; framing is the job of
//! [`NewlineCodec`](crate::NewlineCodec) on the way in and of the relay's
//! delivery path on the way out.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance lives in the shared
/// server state for the lifetime of the relay and is used from every
/// connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected shape.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`), the relay's only wire
/// format.
///
/// ## Example
///
/// ```rust
/// use switchboard_protocol::{Codec, Envelope, JsonCodec, ServerMessage};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::now(ServerMessage::Pong);
///
/// let bytes = codec.encode(&envelope).unwrap();
/// assert!(!bytes.contains(&b'\n'));
///
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded.message, ServerMessage::Pong);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        // Compact output never contains a raw newline: newlines inside
        // strings are escaped, so one value is always one frame.
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientMessage, RawFrame};

    #[test]
    fn test_encode_escapes_embedded_newlines() {
        let msg = ClientMessage::Message {
            content: "line one\nline two".into(),
        };
        let bytes = JsonCodec.encode(&msg).unwrap();
        assert!(!bytes.contains(&b'\n'));
    }

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<RawFrame, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let result: Result<RawFrame, _> =
            JsonCodec.decode(b"{\"type\":\"\xff\"}");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
