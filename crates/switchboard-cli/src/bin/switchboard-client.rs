//! `switchboard-client [HOST] [PORT] --system-id S --client-id C`:
//! an interactive terminal client.

use anyhow::bail;
use clap::Parser;
use switchboard_cli::{Backoff, ClientConfig, run_client, spawn_stdin_reader};
use switchboard_protocol::is_valid_id_part;

/// Interactive client for a switchboard relay.
#[derive(Parser, Debug)]
#[command(name = "switchboard-client", version, about)]
struct Args {
    /// Relay host.
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Relay port.
    #[arg(default_value_t = 8080)]
    port: u16,

    /// System part of the identity.
    #[arg(long, short = 's')]
    system_id: String,

    /// Client part of the identity.
    #[arg(long, short = 'c')]
    client_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchboard_cli::init_tracing("warn");
    let args = Args::parse();

    for (name, value) in
        [("system id", &args.system_id), ("client id", &args.client_id)]
    {
        if !is_valid_id_part(value) {
            bail!("{name} '{value}' may only contain letters, digits, '_' and '-'");
        }
    }

    let config = ClientConfig {
        addr: format!("{}:{}", args.host, args.port),
        system_id: args.system_id,
        client_id: args.client_id,
        backoff: Backoff::default(),
    };
    println!("* connecting to {} (type /help for commands)", config.addr);
    run_client(config, spawn_stdin_reader()).await
}
