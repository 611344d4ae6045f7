//! `switchboard-relay [PORT] [HOST]`: run a relay until SIGINT/SIGTERM.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use switchboard::RelayServer;

/// Line-delimited JSON relay.
#[derive(Parser, Debug)]
#[command(name = "switchboard-relay", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(default_value_t = 8080)]
    port: u16,

    /// Interface to bind.
    #[arg(default_value = "0.0.0.0")]
    host: String,

    /// Connections accepted at once; further ones are closed.
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,

    /// Close connections silent for this many seconds.
    #[arg(long, default_value_t = 300)]
    idle_timeout_secs: u64,

    /// Log stats this often; 0 disables.
    #[arg(long, default_value_t = 60)]
    stats_interval_secs: u64,

    /// TCP keep-alive probe interval; 0 disables.
    #[arg(long, default_value_t = 60)]
    keepalive_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchboard_cli::init_tracing("info");
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.host, args.port);

    let server = RelayServer::builder()
        .bind(bind_addr.clone())
        .max_connections(args.max_connections)
        .idle_timeout(Duration::from_secs(args.idle_timeout_secs))
        .stats_interval(Duration::from_secs(args.stats_interval_secs))
        .keepalive_interval(Duration::from_secs(args.keepalive_secs))
        .build()
        .await
        .with_context(|| format!("failed to start relay on {bind_addr}"))?;
    let handle = server.handle();
    let mut relay = tokio::spawn(server.run());

    tokio::select! {
        signal = switchboard_cli::shutdown_signal() => {
            let signal = signal.context("failed to listen for signals")?;
            tracing::info!(signal, "signal received");
        }
        finished = &mut relay => {
            // The accept loop only returns after a shutdown.
            finished.context("relay task panicked")??;
            return Ok(());
        }
    }

    let closed = handle.shutdown().await;
    tracing::info!(closed, "connections closed");
    relay.await.context("relay task panicked")??;
    Ok(())
}
