//! Per-connection handler: read loop, writer task, and teardown.
//!
//! Each accepted connection gets two Tokio tasks:
//!   1. The read loop (this handler): receive bytes → append to the
//!      connection's buffer → hand each complete frame to the router.
//!   2. The writer: drain the connection's outbound channel into the socket.
//!
//! The read loop only suspends while waiting for bytes. Frame handling
//! happens with the registry lock held and never awaits a peer.
//!
//! Both tasks stamp a shared [`Activity`] clock. The idle timeout fires
//! only when neither direction has moved a byte for the whole period, so
//! a peer that only listens stays connected while traffic reaches it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use switchboard_protocol::Codec;
use switchboard_transport::{
    Connection, ConnectionId, TcpConnection, TransportError,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::RelayError;
use crate::server::ServerState;

/// How long a closing connection's writer may take to flush what is
/// already queued.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drop guard that releases the connection's slot and, if the handler
/// did not reach its normal teardown (panic or cancellation), removes the
/// connection from the registry.
///
/// `Drop` is synchronous, so the registry cleanup is spawned as a
/// fire-and-forget task.
struct DisconnectGuard<C: Codec> {
    conn_id: ConnectionId,
    state: Arc<ServerState<C>>,
    armed: bool,
}

impl<C: Codec> DisconnectGuard<C> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: Codec> Drop for DisconnectGuard<C> {
    fn drop(&mut self) {
        self.state.stats.release();
        if !self.armed {
            return;
        }
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let mut registry = state.registry.lock().await;
                state.router.handle_disconnect(&mut registry, conn_id);
            });
        }
    }
}

/// When bytes last moved on a connection, in either direction.
struct Activity {
    started: Instant,
    /// Milliseconds after `started`.
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn record(&self) {
        let now_ms =
            u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Why a read loop stopped.
enum Exit {
    PeerClosed,
    IdleTimeout,
    Shutdown,
    Evicted,
    ReadFailed(TransportError),
}

/// Handles a single connection from accept to close.
///
/// The caller must already have claimed a connection slot in
/// `state.stats`; it is released when this returns.
pub(crate) async fn handle_connection<C: Codec>(
    conn: TcpConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), RelayError> {
    let conn_id = conn.id();
    let peer = conn.peer_addr();
    let mut guard = DisconnectGuard {
        conn_id,
        state: Arc::clone(&state),
        armed: false,
    };

    let conn = Arc::new(conn);
    let activity = Arc::new(Activity::new());
    let (outbound, rx) = mpsc::unbounded_channel();
    let mut writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        Arc::clone(&activity),
        rx,
    ));

    // Subscribe before joining the registry so a shutdown that happens
    // after we join is never missed.
    let mut shutdown = state.shutdown.subscribe();
    {
        let mut registry = state.registry.lock().await;
        if state.closed.load(Ordering::Acquire) {
            tracing::debug!(%conn_id, %peer, "relay closed, dropping connection");
            return Ok(());
        }
        registry.add_connection(conn_id, outbound);
        guard.armed = true;
        state.router.welcome(&registry, conn_id);
    }
    tracing::info!(%conn_id, %peer, "connection opened");

    let idle_timeout = state.config.idle_timeout;
    let exit = loop {
        let remaining = idle_timeout.saturating_sub(activity.idle_for());
        let chunk = tokio::select! {
            _ = shutdown.recv() => break Exit::Shutdown,
            // A pending read is dropped here; reads are cancel-safe.
            _ = tokio::time::sleep(remaining) => {
                if activity.idle_for() >= idle_timeout {
                    break Exit::IdleTimeout;
                }
                continue;
            }
            read = conn.recv() => match read {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break Exit::PeerClosed,
                Err(e) => break Exit::ReadFailed(e),
            },
        };
        activity.record();

        let mut registry = state.registry.lock().await;
        let drained = match registry.append_to_buffer(conn_id, &chunk) {
            Ok(drained) => drained,
            // Removed under us, e.g. by shutdown.
            Err(_) => break Exit::Evicted,
        };
        for frame in &drained.frames {
            state.stats.record_frame();
            state.router.handle_frame(&mut registry, conn_id, frame);
        }
        if drained.overflowed {
            state.stats.record_overflow();
            state.router.handle_overflow(&registry, conn_id);
        }
    };

    match &exit {
        Exit::PeerClosed => {
            tracing::debug!(%conn_id, %peer, "peer closed connection")
        }
        Exit::IdleTimeout => {
            tracing::info!(%conn_id, %peer, "idle timeout, closing connection")
        }
        Exit::Shutdown | Exit::Evicted => {
            tracing::debug!(%conn_id, %peer, "connection closed by relay")
        }
        Exit::ReadFailed(e) => {
            tracing::debug!(%conn_id, %peer, error = %e, "read failed")
        }
    }

    {
        let mut registry = state.registry.lock().await;
        state.router.handle_disconnect(&mut registry, conn_id);
    }
    guard.disarm();

    // The registry held the only other sender; with it gone the writer
    // flushes what is queued and closes the socket.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(%conn_id, "writer did not drain in time");
        writer.abort();
    }
    tracing::info!(%conn_id, %peer, "connection closed");

    match exit {
        Exit::ReadFailed(e) => Err(RelayError::Transport(e)),
        _ => Ok(()),
    }
}

/// Writes queued frames to the socket until the channel closes or a write
/// fails, then shuts the socket's write side. Every successful write
/// counts as activity.
///
/// Exiting drops the receiver, so later deliveries to this connection
/// report failure instead of queueing.
async fn write_loop(
    conn: Arc<TcpConnection>,
    activity: Arc<Activity>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let conn_id = conn.id();
    while let Some(frame) = rx.recv().await {
        if let Err(e) = conn.send(&frame).await {
            tracing::debug!(%conn_id, error = %e, "write failed");
            break;
        }
        activity.record();
    }
    drop(rx);
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "socket shutdown failed");
    }
}
