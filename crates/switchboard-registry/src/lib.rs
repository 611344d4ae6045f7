//! Connection registry for Switchboard.
//!
//! The registry is the single owner of shared routing state:
//!
//! 1. **Connections**: one [`ConnectionRecord`] per accepted socket, holding
//!    its identity (once registered), its partial-read buffer, and the
//!    handle used to write to it.
//! 2. **Identity map**: `systemId.clientId` → owning connection. At most one
//!    live connection per identity, and never an entry for a removed
//!    connection.
//!
//! # How it fits in the stack
//!
//! ```text
//! Relay router (above)  ← validates and dispatches frames
//!     ↕
//! Registry (this crate) ← who is connected, who is who, where to write
//!     ↕
//! Protocol (below)      ← Identity, NewlineCodec, ClientEntry
//! ```
//!
//! `Registry` is a plain struct with `&mut self` methods. It is not
//! thread-safe on its own; the relay keeps it behind one mutex so every
//! mutation is serialized.

mod connection;
mod error;
mod registry;

pub use connection::{ConnectionRecord, OutboundSender};
pub use error::RegistryError;
pub use registry::{Drained, Registration, Registry};
