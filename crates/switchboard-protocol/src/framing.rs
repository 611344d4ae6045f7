//! Newline framing: turns an arbitrary byte stream back into frames.
//!
//! TCP delivers bytes, not messages. A frame may arrive split across many
//! reads, or several frames may arrive in one read. [`NewlineCodec`] is a
//! `tokio_util` codec over a `BytesMut` that holds whatever has not yet
//! been terminated by `\n`; it hands out every complete frame as soon as
//! its newline shows up, and writes frames back out newline-terminated.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ProtocolError;

/// Default ceiling on pending (unterminated) bytes per connection.
pub const DEFAULT_MAX_BUFFER_LEN: usize = 10_000;

/// Newline-delimited frame codec.
///
/// Decoding strips the `\n` and skips blank (whitespace-only) lines. When
/// no newline is left and more than `max_len` bytes are pending, the
/// pending bytes are discarded and [`ProtocolError::FrameTooLarge`] is
/// returned. The buffer is usable again afterwards, so callers that drive
/// the codec by hand can report the overflow and carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewlineCodec {
    max_len: usize,
}

impl NewlineCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Ceiling on pending bytes.
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl Default for NewlineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_LEN)
    }
}

impl Decoder for NewlineCodec {
    type Item = Vec<u8>;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(offset) = src.iter().position(|&b| b == b'\n') {
            let line = src.split_to(offset + 1);
            let frame = &line[..offset];
            if !frame.iter().all(u8::is_ascii_whitespace) {
                return Ok(Some(frame.to_vec()));
            }
        }

        if src.len() > self.max_len {
            let len = src.len();
            src.clear();
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }
        Ok(None)
    }
}

impl<'a> Encoder<&'a [u8]> for NewlineCodec {
    type Error = ProtocolError;

    /// Writes `item` followed by `\n`. Frames never contain a raw newline
    /// (the JSON codec escapes them), so nothing is checked here.
    fn encode(
        &mut self,
        item: &'a [u8],
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes until the codec wants more bytes or reports an overflow.
    fn drain(
        codec: &mut NewlineCodec,
        buf: &mut BytesMut,
    ) -> (Vec<Vec<u8>>, bool) {
        let mut frames = Vec::new();
        loop {
            match codec.decode(buf) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, false),
                Err(ProtocolError::FrameTooLarge { .. }) => {
                    return (frames, true);
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    fn push(
        codec: &mut NewlineCodec,
        buf: &mut BytesMut,
        bytes: &[u8],
    ) -> (Vec<Vec<u8>>, bool) {
        buf.extend_from_slice(bytes);
        drain(codec, buf)
    }

    #[test]
    fn test_decode_without_newline_yields_nothing() {
        let mut codec = NewlineCodec::default();
        let mut buf = BytesMut::new();

        let (frames, overflowed) =
            push(&mut codec, &mut buf, br#"{"type":"ping"}"#);

        assert!(frames.is_empty());
        assert!(!overflowed);
        assert_eq!(buf.len(), 15);
    }

    #[test]
    fn test_decode_completes_frame_split_across_reads() {
        let mut codec = NewlineCodec::default();
        let mut buf = BytesMut::new();
        assert!(push(&mut codec, &mut buf, br#"{"type":"#).0.is_empty());

        let (frames, _) = push(&mut codec, &mut buf, b"\"ping\"}\n");

        assert_eq!(frames, vec![br#"{"type":"ping"}"#.to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_extracts_several_frames_and_keeps_tail() {
        let mut codec = NewlineCodec::default();
        let mut buf = BytesMut::new();

        let (frames, _) = push(&mut codec, &mut buf, b"one\ntwo\nthr");

        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(&buf[..], b"thr");

        let (frames, _) = push(&mut codec, &mut buf, b"ee\n");
        assert_eq!(frames, vec![b"three".to_vec()]);
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut codec = NewlineCodec::default();
        let mut buf = BytesMut::from(&b"\n\r\n  \nping\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"ping".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_overflow_clears_buffer() {
        let mut codec = NewlineCodec::default();
        let mut buf = BytesMut::from(&vec![b'a'; DEFAULT_MAX_BUFFER_LEN + 1][..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { len, max }
                if len == DEFAULT_MAX_BUFFER_LEN + 1
                    && max == DEFAULT_MAX_BUFFER_LEN
        ));
        assert!(buf.is_empty());

        // The codec keeps working afterwards.
        let (frames, overflowed) = push(&mut codec, &mut buf, b"ping\n");
        assert_eq!(frames, vec![b"ping".to_vec()]);
        assert!(!overflowed);
    }

    #[test]
    fn test_decode_exactly_at_ceiling_does_not_overflow() {
        let mut codec = NewlineCodec::default();
        let mut buf = BytesMut::new();

        let (_, overflowed) =
            push(&mut codec, &mut buf, &vec![b'a'; DEFAULT_MAX_BUFFER_LEN]);

        assert!(!overflowed);
        assert_eq!(buf.len(), DEFAULT_MAX_BUFFER_LEN);
    }

    #[test]
    fn test_decode_overflow_accumulated_over_reads() {
        let mut codec = NewlineCodec::new(10);
        let mut buf = BytesMut::new();
        assert!(!push(&mut codec, &mut buf, b"123456").1);

        let (_, overflowed) = push(&mut codec, &mut buf, b"78901");

        assert!(overflowed);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_overflow_comes_after_earlier_frames() {
        let mut codec = NewlineCodec::new(4);
        let mut buf = BytesMut::new();

        let (frames, overflowed) =
            push(&mut codec, &mut buf, b"ok\ntoo-long-tail");

        assert_eq!(frames, vec![b"ok".to_vec()]);
        assert!(overflowed);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_long_frame_with_newline_is_not_an_overflow() {
        // The ceiling applies to what is left pending, not to frames
        // completed in the same read.
        let mut codec = NewlineCodec::new(4);
        let mut chunk = vec![b'x'; 20];
        chunk.push(b'\n');
        let mut buf = BytesMut::new();

        let (frames, overflowed) = push(&mut codec, &mut buf, &chunk);

        assert_eq!(frames.len(), 1);
        assert!(!overflowed);
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = NewlineCodec::default();
        let mut dst = BytesMut::new();

        codec.encode(br#"{"type":"pong"}"#.as_slice(), &mut dst).unwrap();
        codec.encode(b"next".as_slice(), &mut dst).unwrap();

        assert_eq!(&dst[..], b"{\"type\":\"pong\"}\nnext\n");
    }
}
