//! Parsing of what the user types into the client.

use switchboard_protocol::ClientMessage;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: broadcast to everyone.
    Broadcast(String),
    /// `/msg <target> <text>`
    Private { target: String, content: String },
    /// `/list`
    List,
    /// `/ping`
    Ping,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("nothing to send")]
    Empty,

    #[error("usage: /msg <system.client> <text>")]
    MsgUsage,

    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  <text>                      send to everyone
  /msg <system.client> <text> send privately
  /list                       list connected clients
  /ping                       check the relay is alive
  /help                       show this help
  /quit                       exit";

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Broadcast(line.to_string()));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        match name {
            "msg" => {
                let (target, content) = args
                    .split_once(char::is_whitespace)
                    .ok_or(CommandError::MsgUsage)?;
                let content = content.trim();
                if content.is_empty() {
                    return Err(CommandError::MsgUsage);
                }
                Ok(Self::Private {
                    target: target.to_string(),
                    content: content.to_string(),
                })
            }
            "list" => Ok(Self::List),
            "ping" => Ok(Self::Ping),
            "help" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// The frame this command sends, if any.
    pub fn into_message(self) -> Option<ClientMessage> {
        match self {
            Self::Broadcast(content) => Some(ClientMessage::Message { content }),
            Self::Private { target, content } => {
                Some(ClientMessage::PrivateMessage { target, content })
            }
            Self::List => Some(ClientMessage::ListClients),
            Self::Ping => Some(ClientMessage::Ping),
            Self::Help | Self::Quit => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_broadcast() {
        assert_eq!(
            Command::parse("  hello there  "),
            Ok(Command::Broadcast("hello there".into()))
        );
    }

    #[test]
    fn test_parse_msg_splits_target_and_text() {
        assert_eq!(
            Command::parse("/msg ops.beta see you at  noon"),
            Ok(Command::Private {
                target: "ops.beta".into(),
                content: "see you at  noon".into(),
            })
        );
    }

    #[test]
    fn test_parse_msg_without_text_is_usage_error() {
        assert_eq!(Command::parse("/msg ops.beta"), Err(CommandError::MsgUsage));
        assert_eq!(Command::parse("/msg"), Err(CommandError::MsgUsage));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("/list"), Ok(Command::List));
        assert_eq!(Command::parse("/ping"), Ok(Command::Ping));
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("/quit"), Ok(Command::Quit));
        assert_eq!(Command::parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        assert_eq!(
            Command::parse("/dance now"),
            Err(CommandError::Unknown("dance".into()))
        );
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
    }

    #[test]
    fn test_into_message_maps_to_frames() {
        assert_eq!(
            Command::Broadcast("hi".into()).into_message(),
            Some(ClientMessage::Message {
                content: "hi".into()
            })
        );
        assert_eq!(Command::List.into_message(), Some(ClientMessage::ListClients));
        assert_eq!(Command::Quit.into_message(), None);
    }
}
