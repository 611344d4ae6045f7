//! Wire protocol for Switchboard.
//!
//! This crate defines what relay and clients say to each other:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`Envelope`],
//!   [`Identity`]): the messages that travel on the wire.
//! - **Framing** ([`NewlineCodec`]): a `tokio_util` codec that reassembles
//!   a raw byte stream into newline-delimited frames and writes them back.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how a frame's bytes map
//!   to those types.
//! - **Errors** ([`ProtocolError`]): what can go wrong on the way.
//!
//! # Architecture
//!
//! ```text
//! Transport (byte chunks) → NewlineCodec (frames) → Codec (RawFrame)
//!     → ClientMessage::try_from (validated) → relay router
//! ```
//!
//! The protocol layer knows nothing about sockets or who is registered.

mod codec;
mod error;
mod framing;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use framing::{DEFAULT_MAX_BUFFER_LEN, NewlineCodec};
pub use types::{
    ClientEntry, ClientMessage, Envelope, Identity, RawFrame, ServerMessage,
    is_valid_id_part,
};
