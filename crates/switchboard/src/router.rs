//! Message router: validates each frame and dispatches it by type.
//!
//! The router is stateless apart from its codec. Every method takes the
//! registry explicitly and runs to completion while the caller holds the
//! registry lock, so one router step (say, a `register` plus the fan-out
//! of `client_joined`) is atomic with respect to every other connection.

use bytes::BytesMut;
use switchboard_protocol::{
    ClientMessage, Codec, Envelope, Identity, NewlineCodec, ProtocolError,
    RawFrame, ServerMessage,
};
use switchboard_registry::{Registry, RegistryError};
use switchboard_transport::ConnectionId;
use tokio_util::codec::Encoder;

const WELCOME_TEXT: &str =
    "Connected to relay. Register with systemId and clientId.";
const SHUTDOWN_TEXT: &str = "Server is shutting down";
const OVERFLOW_TEXT: &str = "message too large, buffer cleared";
const MUST_REGISTER_TEXT: &str = "must register first";

/// Routes decoded frames between registered identities.
pub struct Router<C: Codec> {
    codec: C,
}

impl<C: Codec> Router<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    // ---------------------------------------------------------------------
    // Delivery primitive
    // ---------------------------------------------------------------------

    /// Serializes `message` and queues it, newline-terminated, for `to`.
    ///
    /// Returns `true` only if the frame was handed to a live writer. This
    /// is the sole delivery signal; there is no acknowledgement above it.
    pub fn deliver(
        &self,
        registry: &Registry,
        to: ConnectionId,
        message: ServerMessage,
    ) -> bool {
        match self.encode_line(message) {
            Some(line) => send_line(registry, to, line),
            None => false,
        }
    }

    /// Delivers `message` to every registered connection except `except`.
    ///
    /// A recipient whose writer is gone is skipped; the fan-out continues.
    /// Returns how many deliveries succeeded.
    fn broadcast(
        &self,
        registry: &Registry,
        message: ServerMessage,
        except: Option<ConnectionId>,
    ) -> usize {
        let kind = message.kind();
        let Some(line) = self.encode_line(message) else {
            return 0;
        };
        let delivered = registry
            .registered_ids()
            .into_iter()
            .filter(|id| Some(*id) != except)
            .filter(|id| send_line(registry, *id, line.clone()))
            .count();
        tracing::debug!(kind, delivered, "broadcast");
        delivered
    }

    fn encode_line(&self, message: ServerMessage) -> Option<Vec<u8>> {
        let kind = message.kind();
        let mut line = BytesMut::new();
        let encoded = self
            .codec
            .encode(&Envelope::now(message))
            .and_then(|bytes| {
                NewlineCodec::default().encode(bytes.as_slice(), &mut line)
            });
        match encoded {
            Ok(()) => Some(line.to_vec()),
            Err(e) => {
                tracing::error!(kind, error = %e, "failed to encode frame");
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    /// Greets a freshly accepted connection.
    pub fn welcome(&self, registry: &Registry, id: ConnectionId) -> bool {
        self.deliver(
            registry,
            id,
            ServerMessage::Welcome {
                message: WELCOME_TEXT.to_string(),
            },
        )
    }

    /// Tells a connection its read buffer overflowed and was cleared.
    /// The connection stays open.
    pub fn handle_overflow(&self, registry: &Registry, id: ConnectionId) {
        self.deliver(registry, id, ServerMessage::error(OVERFLOW_TEXT));
    }

    /// Removes a connection and, if it was registered, tells every
    /// remaining registered connection it left.
    ///
    /// Returns the identity that departed, if any. Dropping the removed
    /// record releases the socket's writer, which closes the socket.
    pub fn handle_disconnect(
        &self,
        registry: &mut Registry,
        id: ConnectionId,
    ) -> Option<Identity> {
        let record = registry.remove_connection(id)?;
        let identity = record.identity().cloned();
        let session_secs = record.connected_at().elapsed().as_secs();
        drop(record);

        if let Some(identity) = &identity {
            tracing::info!(
                conn_id = %id,
                full_id = %identity,
                session_secs,
                "client left"
            );
            self.broadcast(
                registry,
                ServerMessage::ClientLeft(identity.entry()),
                None,
            );
        } else {
            tracing::debug!(
                conn_id = %id,
                session_secs,
                "unregistered connection closed"
            );
        }
        identity
    }

    /// Sends `server_shutdown` to every connection, registered or not,
    /// then removes them all. Returns how many connections were closed.
    pub fn shutdown_all(&self, registry: &mut Registry) -> usize {
        let notice = ServerMessage::ServerShutdown {
            message: SHUTDOWN_TEXT.to_string(),
        };
        if let Some(line) = self.encode_line(notice) {
            for id in registry.connection_ids() {
                send_line(registry, id, line.clone());
            }
        }
        let closed = registry.drain().len();
        tracing::info!(closed, "all connections closed");
        closed
    }

    // ---------------------------------------------------------------------
    // Frame dispatch
    // ---------------------------------------------------------------------

    /// Handles one complete frame from `id`.
    ///
    /// Bad input is answered with an `error` frame to the sender only;
    /// nothing here ever closes the connection.
    pub fn handle_frame(
        &self,
        registry: &mut Registry,
        id: ConnectionId,
        frame: &[u8],
    ) {
        let message = match self.decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(conn_id = %id, error = %e, "rejected frame");
                self.deliver(registry, id, ServerMessage::error(e.to_string()));
                return;
            }
        };

        tracing::debug!(conn_id = %id, kind = message.kind(), "frame received");

        match message {
            ClientMessage::Register {
                system_id,
                client_id,
            } => self.on_register(registry, id, &system_id, &client_id),
            ClientMessage::Ping => {
                self.deliver(registry, id, ServerMessage::Pong);
            }
            ClientMessage::ListClients => {
                if self.registered_sender(registry, id).is_some() {
                    let list = ServerMessage::client_list(registry.directory());
                    self.deliver(registry, id, list);
                }
            }
            ClientMessage::Message { content } => {
                if let Some(from) = self.registered_sender(registry, id) {
                    self.on_broadcast(registry, id, &from, content);
                }
            }
            ClientMessage::PrivateMessage { target, content } => {
                if let Some(from) = self.registered_sender(registry, id) {
                    self.on_private(registry, id, &from, target, content);
                }
            }
        }
    }

    /// The identity `id` holds. If it has not registered, answers with
    /// `must register first` and returns `None`.
    fn registered_sender(
        &self,
        registry: &Registry,
        id: ConnectionId,
    ) -> Option<Identity> {
        let sender = registry.identity(id).cloned();
        if sender.is_none() {
            self.deliver(registry, id, ServerMessage::error(MUST_REGISTER_TEXT));
        }
        sender
    }

    fn decode(&self, frame: &[u8]) -> Result<ClientMessage, ProtocolError> {
        let raw: RawFrame = self.codec.decode(frame)?;
        ClientMessage::try_from(raw)
    }

    fn on_register(
        &self,
        registry: &mut Registry,
        id: ConnectionId,
        system_id: &str,
        client_id: &str,
    ) {
        let registration =
            match registry.try_register(id, system_id, client_id) {
                Ok(registration) => registration,
                Err(RegistryError::UnknownConnection(_)) => {
                    tracing::debug!(conn_id = %id, "register from a closed connection");
                    return;
                }
                Err(e) => {
                    tracing::info!(conn_id = %id, error = %e, "registration rejected");
                    self.deliver(registry, id, ServerMessage::error(e.to_string()));
                    return;
                }
            };

        let identity = &registration.identity;
        let full_id = identity.full_id();
        self.deliver(
            registry,
            id,
            ServerMessage::Registered {
                system_id: identity.system_id().to_string(),
                client_id: identity.client_id().to_string(),
                full_id: full_id.clone(),
                message: format!("registered as {full_id}"),
            },
        );
        self.deliver(
            registry,
            id,
            ServerMessage::client_list(registry.directory()),
        );

        if registration.is_new_identity() {
            if let Some(previous) = &registration.previous {
                self.broadcast(
                    registry,
                    ServerMessage::ClientLeft(previous.entry()),
                    Some(id),
                );
            }
            self.broadcast(
                registry,
                ServerMessage::ClientJoined(identity.entry()),
                Some(id),
            );
        }
    }

    fn on_broadcast(
        &self,
        registry: &Registry,
        id: ConnectionId,
        from: &Identity,
        content: String,
    ) {
        let delivered = self.broadcast(
            registry,
            ServerMessage::ChatMessage {
                from: from.full_id(),
                content,
            },
            Some(id),
        );
        tracing::debug!(full_id = %from, delivered, "chat message fanned out");
    }

    fn on_private(
        &self,
        registry: &Registry,
        id: ConnectionId,
        from: &Identity,
        target: String,
        content: String,
    ) {
        let from = from.full_id();
        if target == from {
            self.deliver(
                registry,
                id,
                ServerMessage::error("cannot message yourself"),
            );
            return;
        }

        let Some(target_id) = registry.resolve(&target) else {
            self.deliver(
                registry,
                id,
                ServerMessage::error(format!(
                    "client {target} not found or offline"
                )),
            );
            return;
        };

        let delivered = self.deliver(
            registry,
            target_id,
            ServerMessage::PrivateMessage {
                from: from.clone(),
                content: content.clone(),
            },
        );

        if delivered {
            tracing::debug!(%from, to = %target, "private message delivered");
            self.deliver(
                registry,
                id,
                ServerMessage::PrivateSent {
                    to: target,
                    content,
                },
            );
        } else {
            tracing::debug!(%from, to = %target, "private message not delivered");
            self.deliver(
                registry,
                id,
                ServerMessage::error(format!(
                    "failed to deliver message to {target}"
                )),
            );
        }
    }
}

/// Queues an already encoded line for `to`.
fn send_line(registry: &Registry, to: ConnectionId, line: Vec<u8>) -> bool {
    let Some(record) = registry.get(to) else {
        return false;
    };
    let sent = record.send(line);
    if !sent {
        tracing::debug!(conn_id = %to, "writer gone, frame dropped");
    }
    sent
}
