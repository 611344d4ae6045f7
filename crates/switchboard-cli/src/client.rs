//! The interactive client's connection loop.
//!
//! ```text
//!   connect ──→ register ──→ relay frames ⇄ user commands
//!      ↑                          │
//!      └──── backoff ←── lost / server_shutdown
//! ```

use std::time::Duration;

use anyhow::Context;
use switchboard_protocol::{
    ClientMessage, Codec, Envelope, JsonCodec, ServerMessage,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

use crate::backoff::Backoff;
use crate::command::{Command, CommandError, HELP};
use crate::render::render;

/// Where to connect and who to be.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub system_id: String,
    pub client_id: String,
    pub backoff: Backoff,
}

/// How a session with the relay ended.
enum SessionEnd {
    Quit,
    Lost(&'static str),
}

/// Reads stdin line by line on a background task.
///
/// The channel closes when stdin does.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Runs sessions until the user quits, reconnecting with backoff whenever
/// the relay goes away.
pub async fn run_client(
    mut config: ClientConfig,
    mut input: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    loop {
        match session(&mut config, &mut input).await {
            Ok(SessionEnd::Quit) => return Ok(()),
            Ok(SessionEnd::Lost(reason)) => {
                tracing::info!(reason, "disconnected from relay");
            }
            Err(e) => {
                tracing::warn!(error = %e, "session failed");
            }
        }

        let delay = config.backoff.next_delay();
        println!("* reconnecting in {:.1}s", delay.as_secs_f64());
        if wait_or_quit(delay, &mut input).await {
            return Ok(());
        }
    }
}

/// Sleeps for `delay`, still honouring `/quit`. Returns `true` if the
/// user quit.
async fn wait_or_quit(
    delay: Duration,
    input: &mut mpsc::Receiver<String>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            line = input.recv() => match line {
                None => return true,
                Some(line) => match Command::parse(&line) {
                    Ok(Command::Quit) => return true,
                    Ok(Command::Help) => println!("{HELP}"),
                    Err(CommandError::Empty) => {}
                    _ => println!("! not connected"),
                },
            },
        }
    }
}

async fn session(
    config: &mut ClientConfig,
    input: &mut mpsc::Receiver<String>,
) -> anyhow::Result<SessionEnd> {
    let stream = TcpStream::connect(&config.addr)
        .await
        .with_context(|| format!("failed to connect to {}", config.addr))?;
    config.backoff.reset();
    tracing::info!(addr = %config.addr, "connected");

    let codec = JsonCodec;
    let (reader, mut writer) = stream.into_split();
    let mut frames = BufReader::new(reader).lines();

    let register = ClientMessage::Register {
        system_id: config.system_id.clone(),
        client_id: config.client_id.clone(),
    };
    send(&mut writer, &codec, &register).await?;

    loop {
        tokio::select! {
            line = frames.next_line() => {
                let Some(line) = line.context("read from relay failed")? else {
                    return Ok(SessionEnd::Lost("connection closed"));
                };
                if line.trim().is_empty() {
                    continue;
                }
                match codec.decode::<Envelope>(line.as_bytes()) {
                    Ok(envelope) => {
                        println!("{}", render(&envelope));
                        if matches!(
                            envelope.message,
                            ServerMessage::ServerShutdown { .. }
                        ) {
                            return Ok(SessionEnd::Lost("relay shut down"));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "unreadable frame from relay");
                    }
                }
            }
            line = input.recv() => {
                let Some(line) = line else {
                    return Ok(SessionEnd::Quit);
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => return Ok(SessionEnd::Quit),
                    Ok(Command::Help) => println!("{HELP}"),
                    Ok(command) => {
                        if let Some(message) = command.into_message() {
                            send(&mut writer, &codec, &message).await?;
                        }
                    }
                    Err(CommandError::Empty) => {}
                    Err(e) => println!("! {e}"),
                }
            }
        }
    }
}

async fn send(
    writer: &mut OwnedWriteHalf,
    codec: &JsonCodec,
    message: &ClientMessage,
) -> anyhow::Result<()> {
    let mut frame = codec.encode(message)?;
    frame.push(b'\n');
    writer
        .write_all(&frame)
        .await
        .context("write to relay failed")?;
    Ok(())
}
