//! One-line terminal rendering of relay frames.

use chrono::Local;
use switchboard_protocol::{Envelope, ServerMessage};

/// Formats a frame for display, prefixed with its local wall-clock time.
pub fn render(envelope: &Envelope) -> String {
    let time = envelope.timestamp.with_timezone(&Local).format("%H:%M:%S");
    format!("[{time}] {}", describe(&envelope.message))
}

fn describe(message: &ServerMessage) -> String {
    match message {
        ServerMessage::Welcome { message } => format!("* {message}"),
        ServerMessage::Registered { full_id, .. } => {
            format!("* registered as {full_id}")
        }
        ServerMessage::ClientList { clients, count, .. } => {
            if clients.is_empty() {
                "* nobody online".to_string()
            } else {
                format!("* {count} online: {}", clients.join(", "))
            }
        }
        ServerMessage::ChatMessage { from, content } => {
            format!("<{from}> {content}")
        }
        ServerMessage::PrivateMessage { from, content } => {
            format!("[private] <{from}> {content}")
        }
        ServerMessage::PrivateSent { to, content } => {
            format!("[private -> {to}] {content}")
        }
        ServerMessage::ClientJoined(entry) => {
            format!("* {} joined", entry.full_id)
        }
        ServerMessage::ClientLeft(entry) => format!("* {} left", entry.full_id),
        ServerMessage::Pong => "* pong".to_string(),
        ServerMessage::Error { message } => format!("! {message}"),
        ServerMessage::ServerShutdown { message } => {
            format!("* relay: {message}")
        }
    }
}
