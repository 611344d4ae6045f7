//! Unified error type for the Switchboard relay.

use switchboard_registry::RegistryError;
use switchboard_transport::TransportError;

/// Top-level error that wraps the layer-specific errors.
///
/// Only conditions that end a task surface here: a failed bind ends start-up,
/// a failed socket read ends one connection. Everything a peer can cause by
/// sending bad frames is answered in-band with an `error` frame instead.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A registry-level error that escaped the router.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use switchboard_transport::ConnectionId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ReceiveFailed(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        ));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Transport(_)));
        assert!(relay_err.to_string().contains("receive failed"));
    }

    #[test]
    fn test_from_registry_error() {
        let err = RegistryError::UnknownConnection(ConnectionId::new(3));
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Registry(_)));
        assert!(relay_err.to_string().contains("conn-3"));
    }
}
