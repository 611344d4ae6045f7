//! The registry: every live connection and the identity map over them.
//!
//! # Concurrency note
//!
//! `Registry` uses plain `HashMap`s and `&mut self` methods. It is owned
//! by the relay's shared state behind a single mutex, and every method
//! finishes its updates to both maps before returning, so nothing outside
//! ever sees the identity map pointing at a removed connection.

use std::collections::HashMap;

use switchboard_protocol::{
    ClientEntry, DEFAULT_MAX_BUFFER_LEN, Identity, ProtocolError,
};
use switchboard_transport::ConnectionId;
use tokio_util::codec::Decoder;

use crate::{ConnectionRecord, OutboundSender, RegistryError};

/// What one [`Registry::append_to_buffer`] produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Complete frames, newline stripped, in arrival order. Blank lines
    /// are skipped.
    pub frames: Vec<Vec<u8>>,

    /// `true` if the pending tail grew past the ceiling and was discarded.
    pub overflowed: bool,
}

/// Outcome of a successful [`Registry::try_register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The identity the connection now holds.
    pub identity: Identity,

    /// The identity it held before, if it was already registered. Equal
    /// to `identity` for an idempotent re-register.
    pub previous: Option<Identity>,
}

impl Registration {
    /// The full identity string, `systemId.clientId`.
    pub fn full_id(&self) -> String {
        self.identity.full_id()
    }

    /// `true` unless this was a re-register of the identity the
    /// connection already held.
    pub fn is_new_identity(&self) -> bool {
        self.previous.as_ref() != Some(&self.identity)
    }
}

/// Single owner of connection state and the identity map.
pub struct Registry {
    /// Every live connection, keyed by connection id.
    connections: HashMap<ConnectionId, ConnectionRecord>,

    /// Full identity → owning connection. Kept in sync with the
    /// `identity` field of the records in `connections`.
    identities: HashMap<String, ConnectionId>,

    /// Ceiling for each connection's pending-bytes buffer.
    max_buffer_len: usize,
}

impl Registry {
    /// Creates an empty registry whose connections buffer at most
    /// `max_buffer_len` unterminated bytes.
    pub fn new(max_buffer_len: usize) -> Self {
        Self {
            connections: HashMap::new(),
            identities: HashMap::new(),
            max_buffer_len,
        }
    }

    /// Adds an unregistered connection.
    ///
    /// Returns `false` and changes nothing if `id` is already present.
    pub fn add_connection(
        &mut self,
        id: ConnectionId,
        outbound: OutboundSender,
    ) -> bool {
        if self.connections.contains_key(&id) {
            tracing::warn!(conn_id = %id, "duplicate connection id ignored");
            return false;
        }
        self.connections.insert(
            id,
            ConnectionRecord::new(id, outbound, self.max_buffer_len),
        );
        tracing::debug!(conn_id = %id, total = self.connections.len(), "connection added");
        true
    }

    /// Removes a connection and, if it was registered, its identity.
    ///
    /// Returns the removed record so the caller can tell whether peers are
    /// owed a departure notice. Dropping the record drops its outbound
    /// sender, which lets the writer task finish and close the socket.
    pub fn remove_connection(
        &mut self,
        id: ConnectionId,
    ) -> Option<ConnectionRecord> {
        let record = self.connections.remove(&id)?;
        if let Some(identity) = &record.identity {
            self.release_identity(identity, id);
        }
        tracing::debug!(conn_id = %id, total = self.connections.len(), "connection removed");
        Some(record)
    }

    /// Claims `systemId.clientId` for connection `id`.
    ///
    /// If the connection already held an identity, that identity is
    /// released first, in the same step.
    ///
    /// # Errors
    /// - [`RegistryError::UnknownConnection`]: `id` is not present
    /// - [`RegistryError::InvalidIdFormat`]: a part fails the charset check
    /// - [`RegistryError::DuplicateIdentity`]: another connection holds it
    ///
    /// On error nothing changes; a registered connection keeps its
    /// current identity.
    pub fn try_register(
        &mut self,
        id: ConnectionId,
        system_id: &str,
        client_id: &str,
    ) -> Result<Registration, RegistryError> {
        if !self.connections.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }

        let identity =
            Identity::new(system_id, client_id).map_err(|e| match e {
                ProtocolError::InvalidIdentity(part) => {
                    RegistryError::InvalidIdFormat(part)
                }
                other => RegistryError::InvalidIdFormat(other.to_string()),
            })?;
        let full_id = identity.full_id();

        if let Some(&owner) = self.identities.get(&full_id) {
            if owner != id {
                return Err(RegistryError::DuplicateIdentity(full_id));
            }
        }

        let previous = self
            .connections
            .get(&id)
            .and_then(|record| record.identity.clone());
        if let Some(old) = &previous {
            self.release_identity(old, id);
        }

        self.identities.insert(full_id.clone(), id);
        if let Some(record) = self.connections.get_mut(&id) {
            record.identity = Some(identity.clone());
        }

        tracing::info!(conn_id = %id, %full_id, "identity registered");
        Ok(Registration { identity, previous })
    }

    /// Looks up the connection holding a full identity.
    pub fn resolve(&self, full_id: &str) -> Option<ConnectionId> {
        self.identities.get(full_id).copied()
    }

    /// Every registered full identity, sorted lexicographically.
    pub fn list_identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.identities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Directory entries for every registered connection, sorted by full
    /// identity.
    pub fn directory(&self) -> Vec<ClientEntry> {
        let mut entries: Vec<ClientEntry> = self
            .connections
            .values()
            .filter_map(|record| record.identity.as_ref())
            .map(Identity::entry)
            .collect();
        entries.sort();
        entries
    }

    /// Feeds received bytes into a connection's buffer and returns the
    /// frames they complete.
    ///
    /// Whatever follows the last newline stays pending. If that tail is
    /// longer than the ceiling it is discarded and [`Drained::overflowed`]
    /// is set; frames completed earlier in the same chunk are still
    /// returned.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not present.
    pub fn append_to_buffer(
        &mut self,
        id: ConnectionId,
        bytes: &[u8],
    ) -> Result<Drained, RegistryError> {
        let record = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        record.buffer.extend_from_slice(bytes);

        let mut drained = Drained::default();
        loop {
            match record.codec.decode(&mut record.buffer) {
                Ok(Some(frame)) => drained.frames.push(frame),
                Ok(None) => break,
                Err(e) => {
                    record.buffer.clear();
                    tracing::warn!(
                        conn_id = %id,
                        error = %e,
                        "read buffer overflow, pending bytes discarded"
                    );
                    drained.overflowed = true;
                    break;
                }
            }
        }
        Ok(drained)
    }

    /// Looks up a connection record.
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.connections.get(&id)
    }

    /// The identity held by `id`, if it is present and registered.
    pub fn identity(&self, id: ConnectionId) -> Option<&Identity> {
        self.connections.get(&id)?.identity.as_ref()
    }

    /// Ids of every live connection, registered or not.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Ids of every registered connection.
    pub fn registered_ids(&self) -> Vec<ConnectionId> {
        self.identities.values().copied().collect()
    }

    /// Removes every connection and identity, returning the records.
    pub fn drain(&mut self) -> Vec<ConnectionRecord> {
        self.identities.clear();
        self.connections.drain().map(|(_, record)| record).collect()
    }

    /// Number of live connections (registered or not).
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of registered connections.
    pub fn registered_count(&self) -> usize {
        self.identities.len()
    }

    /// Drops the map entry for `identity` if it still belongs to `owner`.
    fn release_identity(&mut self, identity: &Identity, owner: ConnectionId) {
        let full_id = identity.full_id();
        if self.identities.get(&full_id) == Some(&owner) {
            self.identities.remove(&full_id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_LEN)
    }
}

// =========================================================================
// Tests
// =========================================================================
