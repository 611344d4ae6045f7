//! Error types for the registry layer.

use switchboard_transport::ConnectionId;

/// Errors the registry reports to its caller.
///
/// None of these are fatal: the router turns them into an `error` frame for
/// the offending connection and leaves registry state exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `systemId` or `clientId` is empty or contains characters outside
    /// `[A-Za-z0-9_-]`.
    #[error(
        "invalid systemId or clientId '{0}': use only letters, digits, '_' and '-'"
    )]
    InvalidIdFormat(String),

    /// Another live connection already holds this full identity.
    #[error("identity {0} is already in use")]
    DuplicateIdentity(String),

    /// No connection with this id is registered with the registry.
    /// Happens when a frame races the connection's own teardown.
    #[error("connection {0} not found")]
    UnknownConnection(ConnectionId),
}
