//! Shared pieces of the `switchboard-relay` and `switchboard-client`
//! binaries: logging setup, signal handling, and the interactive client.

mod backoff;
mod client;
mod command;
mod logging;
mod render;
mod signal;

pub use backoff::Backoff;
pub use client::{ClientConfig, run_client, spawn_stdin_reader};
pub use command::{Command, CommandError};
pub use logging::init_tracing;
pub use render::render;
pub use signal::shutdown_signal;
