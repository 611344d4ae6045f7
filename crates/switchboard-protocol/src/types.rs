//! Core protocol types for Switchboard's wire format.
//!
//! Every frame is one JSON object on one line. Inbound frames are decoded
//! into a permissive [`RawFrame`] first and then validated into the closed
//! [`ClientMessage`] set, so the relay never dispatches on a half-formed
//! message. Outbound frames are [`ServerMessage`] values wrapped in an
//! [`Envelope`] that stamps them with the send time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Returns `true` if `part` is a legal `systemId` or `clientId`:
/// one or more of `[A-Za-z0-9_-]`.
pub fn is_valid_id_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A validated two-part identity, `systemId.clientId`.
///
/// Neither part may contain `.`, so the full identity string splits back
/// into its parts unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    system_id: String,
    client_id: String,
}

impl Identity {
    /// Validates both parts and builds the identity.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidIdentity`] naming the first part
    /// that fails the charset check.
    pub fn new(
        system_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let system_id = system_id.into();
        let client_id = client_id.into();
        for part in [&system_id, &client_id] {
            if !is_valid_id_part(part) {
                return Err(ProtocolError::InvalidIdentity(part.clone()));
            }
        }
        Ok(Self {
            system_id,
            client_id,
        })
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The full identity string peers address each other by.
    pub fn full_id(&self) -> String {
        self.to_string()
    }

    /// The directory entry for this identity.
    pub fn entry(&self) -> ClientEntry {
        ClientEntry {
            full_id: self.full_id(),
            system_id: self.system_id.clone(),
            client_id: self.client_id.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.system_id, self.client_id)
    }
}

/// One row of the client directory.
///
/// Field order matters: the derived `Ord` compares `full_id` first, which
/// is the order directory listings are sorted in.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    pub full_id: String,
    pub system_id: String,
    pub client_id: String,
}

// ---------------------------------------------------------------------------
// Inbound: RawFrame → ClientMessage
// ---------------------------------------------------------------------------

/// An inbound frame as it appears on the wire, before validation.
///
/// Every field is optional so that a frame with a missing field still
/// decodes and can be answered with a precise error. Fields the relay
/// does not know are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub system_id: Option<String>,
    pub client_id: Option<String>,
    pub target: Option<String>,
    pub content: Option<String>,
}

/// A validated client → relay message.
///
/// Each variant carries only the fields its type requires. The serialized
/// form is what clients put on the wire, e.g.
/// `{"type":"private_message","target":"ops.beta","content":"hi"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Claim an identity for this connection.
    Register { system_id: String, client_id: String },
    /// Broadcast to every other registered connection.
    Message { content: String },
    /// Deliver to exactly one identity.
    PrivateMessage { target: String, content: String },
    /// Ask for the client directory.
    ListClients,
    /// Liveness check; answered with `pong`.
    Ping,
}

impl ClientMessage {
    /// The wire name of this message's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Message { .. } => "message",
            Self::PrivateMessage { .. } => "private_message",
            Self::ListClients => "list_clients",
            Self::Ping => "ping",
        }
    }
}

/// Takes a field that must be present and non-empty.
fn required(
    value: Option<String>,
    name: &'static str,
) -> Result<String, ProtocolError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ProtocolError::MissingField(name))
}

impl TryFrom<RawFrame> for ClientMessage {
    type Error = ProtocolError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        let kind = raw.kind.ok_or(ProtocolError::MissingType)?;
        match kind.as_str() {
            "register" => match (raw.system_id, raw.client_id) {
                // Present-but-empty ids are passed through; the registry
                // rejects them as badly formatted rather than missing.
                (Some(system_id), Some(client_id)) => Ok(Self::Register {
                    system_id,
                    client_id,
                }),
                _ => Err(ProtocolError::MissingField("systemId and clientId")),
            },
            "message" => Ok(Self::Message {
                content: required(raw.content, "content")?,
            }),
            "private_message" => {
                let target = raw.target.filter(|t| !t.is_empty());
                let content = raw.content.filter(|c| !c.is_empty());
                match (target, content) {
                    (Some(target), Some(content)) => {
                        Ok(Self::PrivateMessage { target, content })
                    }
                    _ => Err(ProtocolError::MissingField("target and content")),
                }
            }
            "list_clients" => Ok(Self::ListClients),
            "ping" => Ok(Self::Ping),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound: ServerMessage + Envelope
// ---------------------------------------------------------------------------

/// A relay → client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Sent once, right after the socket is accepted.
    Welcome { message: String },

    /// The sender's `register` succeeded.
    Registered {
        system_id: String,
        client_id: String,
        full_id: String,
        message: String,
    },

    /// The client directory. `clients` is sorted and
    /// `count == clients.len()`.
    ClientList {
        clients: Vec<String>,
        details: Vec<ClientEntry>,
        count: usize,
    },

    /// A broadcast from another identity.
    ChatMessage { from: String, content: String },

    /// A point-to-point message from another identity.
    PrivateMessage { from: String, content: String },

    /// Confirms a private message reached its target.
    PrivateSent { to: String, content: String },

    /// Another identity registered.
    ClientJoined(ClientEntry),

    /// A registered identity went away.
    ClientLeft(ClientEntry),

    Pong,

    /// The sender's last frame was rejected.
    Error { message: String },

    /// The relay is going down; the socket closes next.
    ServerShutdown { message: String },
}

impl ServerMessage {
    /// Builds a `client_list` from directory entries, sorting them by
    /// full identity.
    pub fn client_list(mut details: Vec<ClientEntry>) -> Self {
        details.sort();
        let clients: Vec<String> =
            details.iter().map(|e| e.full_id.clone()).collect();
        Self::ClientList {
            count: clients.len(),
            clients,
            details,
        }
    }

    /// Shorthand for an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire name of this message's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Registered { .. } => "registered",
            Self::ClientList { .. } => "client_list",
            Self::ChatMessage { .. } => "chat_message",
            Self::PrivateMessage { .. } => "private_message",
            Self::PrivateSent { .. } => "private_sent",
            Self::ClientJoined(_) => "client_joined",
            Self::ClientLeft(_) => "client_left",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
            Self::ServerShutdown { .. } => "server_shutdown",
        }
    }
}

/// The outer frame every relay → client message travels in.
///
/// The message's fields are flattened next to `timestamp`, so on the wire
/// a pong is just `{"type":"pong","timestamp":"2025-01-01T12:00:00.000Z"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ServerMessage,

    /// Send time, ISO-8601 in UTC with millisecond precision.
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wraps `message`, stamped with the current time.
    pub fn now(message: ServerMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }
}

mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer
            .serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawFrame {
        serde_json::from_str(json).expect("valid raw frame")
    }

    // -- Identity --------------------------------------------------------

    #[test]
    fn test_is_valid_id_part_accepts_charset() {
        assert!(is_valid_id_part("ops"));
        assert!(is_valid_id_part("Node_01-b"));
        assert!(!is_valid_id_part(""));
        assert!(!is_valid_id_part("has.dot"));
        assert!(!is_valid_id_part("white space"));
        assert!(!is_valid_id_part("émoji"));
    }

    #[test]
    fn test_identity_new_builds_full_id() {
        let id = Identity::new("ops", "alpha").unwrap();
        assert_eq!(id.full_id(), "ops.alpha");
        assert_eq!(id.system_id(), "ops");
        assert_eq!(id.client_id(), "alpha");
    }

    #[test]
    fn test_identity_new_rejects_bad_part() {
        let result = Identity::new("ops", "al.pha");
        assert!(
            matches!(result, Err(ProtocolError::InvalidIdentity(ref p)) if p == "al.pha")
        );
    }

    // -- RawFrame → ClientMessage ---------------------------------------

    #[test]
    fn test_try_from_register() {
        let msg = ClientMessage::try_from(raw(
            r#"{"type":"register","systemId":"ops","clientId":"alpha"}"#,
        ))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                system_id: "ops".into(),
                client_id: "alpha".into()
            }
        );
    }

    #[test]
    fn test_try_from_register_missing_client_id() {
        let result = ClientMessage::try_from(raw(
            r#"{"type":"register","systemId":"ops"}"#,
        ));
        assert!(matches!(result, Err(ProtocolError::MissingField(_))));
    }

    #[test]
    fn test_try_from_missing_type() {
        let result = ClientMessage::try_from(raw(r#"{"content":"hi"}"#));
        assert!(matches!(result, Err(ProtocolError::MissingType)));
    }

    #[test]
    fn test_try_from_unknown_type_names_it() {
        let err = ClientMessage::try_from(raw(r#"{"type":"teleport"}"#))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown message type: teleport");
    }

    #[test]
    fn test_try_from_message_requires_non_empty_content() {
        let result =
            ClientMessage::try_from(raw(r#"{"type":"message","content":""}"#));
        assert!(matches!(result, Err(ProtocolError::MissingField("content"))));
    }

    #[test]
    fn test_try_from_private_message_requires_target() {
        let result = ClientMessage::try_from(raw(
            r#"{"type":"private_message","content":"hi"}"#,
        ));
        assert!(matches!(result, Err(ProtocolError::MissingField(_))));
    }

    #[test]
    fn test_try_from_ignores_unrelated_fields() {
        let msg = ClientMessage::try_from(raw(
            r#"{"type":"ping","timestamp":"2025-01-01T00:00:00Z","extra":1}"#,
        ))
        .unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_client_message_serializes_to_wire_shape() {
        let msg = ClientMessage::PrivateMessage {
            target: "ops.beta".into(),
            content: "hi".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "private_message",
                "target": "ops.beta",
                "content": "hi"
            })
        );

        let reg = serde_json::to_value(ClientMessage::Register {
            system_id: "ops".into(),
            client_id: "alpha".into(),
        })
        .unwrap();
        assert_eq!(reg["systemId"], "ops");
        assert_eq!(reg["clientId"], "alpha");
    }

    // -- ServerMessage / Envelope ---------------------------------------

    #[test]
    fn test_client_list_sorts_and_counts() {
        let entries = vec![
            Identity::new("zeta", "a").unwrap().entry(),
            Identity::new("alpha", "b").unwrap().entry(),
            Identity::new("alpha", "a").unwrap().entry(),
        ];
        match ServerMessage::client_list(entries) {
            ServerMessage::ClientList {
                clients,
                details,
                count,
            } => {
                assert_eq!(clients, vec!["alpha.a", "alpha.b", "zeta.a"]);
                assert_eq!(count, 3);
                assert_eq!(details[0].system_id, "alpha");
                assert_eq!(details[0].client_id, "a");
            }
            other => panic!("expected ClientList, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::now(ServerMessage::ClientJoined(
            Identity::new("ops", "alpha").unwrap().entry(),
        ));
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["type"], "client_joined");
        assert_eq!(json["fullId"], "ops.alpha");
        assert_eq!(json["systemId"], "ops");
        assert_eq!(json["clientId"], "alpha");

        let ts = json["timestamp"].as_str().expect("timestamp string");
        assert!(ts.ends_with('Z'), "UTC timestamp, got {ts}");
        assert_eq!(ts.len(), "2025-01-01T12:00:00.000Z".len());
    }

    #[test]
    fn test_envelope_decodes_unit_variant() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"pong","timestamp":"2025-01-01T12:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(env.message, ServerMessage::Pong);
        assert_eq!(env.timestamp.to_rfc3339(), "2025-01-01T12:00:00+00:00");
    }

    #[test]
    fn test_server_message_kind_matches_wire_tag() {
        let samples = [
            ServerMessage::Pong,
            ServerMessage::error("x"),
            ServerMessage::PrivateSent {
                to: "a.b".into(),
                content: "c".into(),
            },
            ServerMessage::client_list(Vec::new()),
        ];
        for msg in samples {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], msg.kind());
        }
    }
}
