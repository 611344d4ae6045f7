//! # Switchboard
//!
//! A relay for line-delimited JSON over TCP.
//!
//! Peers open a persistent connection, claim a unique `system.client`
//! identity with a `register` frame, and then exchange broadcast and
//! private messages through the relay. The relay keeps one
//! [`Registry`](switchboard_registry::Registry) of live connections and
//! routes every frame through a single [`Router`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchboard::prelude::*;
//!
//! # async fn start() -> Result<(), RelayError> {
//! let server = RelayServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod router;
mod server;
mod stats;

pub use config::RelayConfig;
pub use error::RelayError;
pub use router::Router;
pub use server::{RelayHandle, RelayServer, RelayServerBuilder};
pub use stats::StatsSnapshot;

/// Common imports for running a relay.
pub mod prelude {
    pub use crate::{
        RelayConfig, RelayError, RelayHandle, RelayServer, RelayServerBuilder,
        StatsSnapshot,
    };
    pub use switchboard_protocol::{
        ClientEntry, ClientMessage, Codec, Envelope, JsonCodec, ServerMessage,
    };
    pub use switchboard_transport::BindRetry;
}
