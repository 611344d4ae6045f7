//! `RelayServer` builder, accept loop, and shutdown handle.
//!
//! This is the entry point for running a relay. It ties the layers
//! together: transport → protocol → registry → router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use switchboard_protocol::{Codec, JsonCodec};
use switchboard_registry::Registry;
use switchboard_transport::{BindRetry, Connection, TcpTransport, Transport};
use tokio::sync::{Mutex, broadcast};
use tokio::task::{JoinHandle, JoinSet};

use crate::RelayError;
use crate::config::RelayConfig;
use crate::handler::handle_connection;
use crate::router::Router;
use crate::stats::{RelayStats, StatsSnapshot};

/// How long `run` waits for connection tasks to finish after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Back-off after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Shared relay state passed to each connection task.
///
/// The registry sits behind one mutex; every router step runs with it held.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) router: Router<C>,
    pub(crate) stats: RelayStats,
    pub(crate) config: RelayConfig,
    pub(crate) shutdown: broadcast::Sender<()>,
    /// Set, with the registry lock held, once `shutdown_all` has run.
    pub(crate) closed: AtomicBool,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use switchboard::prelude::*;
///
/// # async fn start() -> Result<(), RelayError> {
/// let server = RelayServer::builder()
///     .bind("127.0.0.1:8080")
///     .max_connections(500)
///     .build()
///     .await?;
/// let handle = server.handle();
/// tokio::spawn(server.run());
/// // ...
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RelayServerBuilder {
    config: RelayConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind to.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn max_buffer_len(mut self, len: usize) -> Self {
        self.config.max_buffer_len = len;
        self
    }

    /// Sets the stats logging period. `Duration::ZERO` disables it.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.config.stats_interval = interval;
        self
    }

    /// Sets the TCP keep-alive probe interval. `Duration::ZERO` disables it.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    pub fn bind_retry(mut self, retry: BindRetry) -> Self {
        self.config.bind_retry = retry;
        self
    }

    /// Binds the listener and builds the relay with the JSON codec.
    ///
    /// # Errors
    /// Returns `RelayError::Transport` if the address cannot be bound,
    /// after retrying while it is in use.
    pub async fn build(self) -> Result<RelayServer<JsonCodec>, RelayError> {
        self.build_with_codec(JsonCodec).await
    }

    /// Binds the listener and builds the relay with a custom codec.
    pub async fn build_with_codec<C: Codec>(
        self,
        codec: C,
    ) -> Result<RelayServer<C>, RelayError> {
        let config = self.config;
        let mut transport =
            TcpTransport::bind_with_retry(&config.bind_addr, &config.bind_retry)
                .await?;
        let keepalive = config.keepalive_interval;
        transport.set_keepalive((!keepalive.is_zero()).then_some(keepalive));
        let (shutdown, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            registry: Mutex::new(Registry::new(config.max_buffer_len)),
            router: Router::new(codec),
            stats: RelayStats::default(),
            config,
            shutdown,
            closed: AtomicBool::new(false),
        });

        Ok(RelayServer { transport, state })
    }
}

/// A bound relay.
///
/// Call [`run()`](Self::run) to start accepting connections, and keep a
/// [`RelayHandle`] to stop it.
pub struct RelayServer<C: Codec = JsonCodec> {
    transport: TcpTransport,
    state: Arc<ServerState<C>>,
}

impl RelayServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }
}

impl<C: Codec> RelayServer<C> {
    /// Returns the local address the relay is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns a handle that can inspect and stop the relay.
    pub fn handle(&self) -> RelayHandle<C> {
        RelayHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the accept loop until [`RelayHandle::shutdown`] is called.
    ///
    /// Each accepted socket gets its own task. Sockets beyond the
    /// connection ceiling are closed straight away. On shutdown the
    /// listener is dropped and connection tasks get a short grace period
    /// to finish.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let mut shutdown = self.state.shutdown.subscribe();
        if self.state.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.local_addr() {
            Ok(addr) => tracing::info!(%addr, "relay running"),
            Err(_) => tracing::info!("relay running"),
        }

        let stats_task = spawn_stats_task(Arc::clone(&self.state));
        let max_connections = self.state.config.max_connections;
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        if !self.state.stats.try_acquire(max_connections) {
                            tracing::warn!(
                                peer = %conn.peer_addr(),
                                max_connections,
                                "connection limit reached, refusing"
                            );
                            let _ = conn.close().await;
                            continue;
                        }
                        let state = Arc::clone(&self.state);
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "connection task panicked");
                        }
                    }
                }
            }
        }

        drop(self.transport);
        if let Some(task) = stats_task {
            task.abort();
        }

        let remaining = tasks.len();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining, "connection tasks did not finish, aborting");
            tasks.shutdown().await;
        }

        tracing::info!("relay stopped");
        Ok(())
    }
}

/// Spawns the periodic stats logger, unless the interval is zero.
fn spawn_stats_task<C: Codec>(
    state: Arc<ServerState<C>>,
) -> Option<JoinHandle<()>> {
    let period = state.config.stats_interval;
    if period.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let registered = state.registry.lock().await.registered_count();
            state.stats.snapshot(registered).log();
        }
    }))
}

/// Cloneable handle to a relay, usable from any task.
pub struct RelayHandle<C: Codec = JsonCodec> {
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Clone for RelayHandle<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<C: Codec> RelayHandle<C> {
    /// Notifies every connection with `server_shutdown`, closes them all,
    /// and stops the accept loop.
    ///
    /// Returns how many connections were closed. Calling it again is a
    /// no-op that returns 0.
    pub async fn shutdown(&self) -> usize {
        let closed = {
            let mut registry = self.state.registry.lock().await;
            if self.state.closed.swap(true, Ordering::AcqRel) {
                return 0;
            }
            tracing::info!("relay shutting down");
            self.state.router.shutdown_all(&mut registry)
        };
        // No receivers just means nothing is running yet.
        let _ = self.state.shutdown.send(());
        closed
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Connections currently in the registry.
    pub async fn connection_count(&self) -> usize {
        self.state.registry.lock().await.len()
    }

    /// Full identities currently registered, sorted.
    pub async fn identities(&self) -> Vec<String> {
        self.state.registry.lock().await.list_identities()
    }

    /// A snapshot of the relay counters.
    pub async fn stats(&self) -> StatsSnapshot {
        let registered = self.state.registry.lock().await.registered_count();
        self.state.stats.snapshot(registered)
    }
}
