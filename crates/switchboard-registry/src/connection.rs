//! Connection records: the registry's view of one accepted socket.
//!
//! A record tracks:
//! - WHICH socket it is (`ConnectionId`)
//! - WHO is on the other end, once they have registered (`Identity`)
//! - WHAT they have sent that isn't a full frame yet (`BytesMut` plus
//!   the `NewlineCodec` that cuts it into frames)
//! - WHERE to write replies (`OutboundSender`)

use std::time::Instant;

use bytes::BytesMut;
use switchboard_protocol::{Identity, NewlineCodec};
use switchboard_transport::ConnectionId;
use tokio::sync::mpsc;

/// Channel feeding a connection's writer task. Each item is one complete,
/// newline-terminated frame.
///
/// Unbounded on purpose: pushing never waits on a slow peer. The cost is
/// that a peer that stops reading accumulates frames in memory.
pub type OutboundSender = mpsc::UnboundedSender<Vec<u8>>;

/// The registry's record of one live connection.
///
/// ## Lifecycle
///
/// ```text
///   add_connection ──→ [unregistered] ──(try_register)──→ [registered]
///                            │                                 │
///                            └──────── remove_connection ──────┘
/// ```
///
/// Registration only ever moves forward: a registered connection may swap
/// to a different identity, but never becomes unregistered again while it
/// is alive.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub(crate) id: ConnectionId,
    pub(crate) identity: Option<Identity>,
    pub(crate) buffer: BytesMut,
    pub(crate) codec: NewlineCodec,
    pub(crate) outbound: OutboundSender,
    pub(crate) connected_at: Instant,
}

impl ConnectionRecord {
    pub(crate) fn new(
        id: ConnectionId,
        outbound: OutboundSender,
        max_buffer_len: usize,
    ) -> Self {
        Self {
            id,
            identity: None,
            buffer: BytesMut::new(),
            codec: NewlineCodec::new(max_buffer_len),
            outbound,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The claimed identity, if this connection has registered.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.identity.is_some()
    }

    /// When the socket was accepted.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Queues one encoded frame for the writer task.
    ///
    /// Returns `false` if the writer is gone (socket closed or failed).
    /// Never blocks.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.outbound.send(frame).is_ok()
    }
}
