//! Raw TCP transport using Tokio sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Size of the scratch buffer used for each socket read.
const READ_CHUNK: usize = 8 * 1024;

/// How many times, and how patiently, to retry a bind that failed with
/// "address in use".
#[derive(Debug, Clone)]
pub struct BindRetry {
    /// Retries after the first attempt. 0 disables retrying.
    pub attempts: u32,
    /// Delay before the first retry. Doubled for each following retry.
    pub initial_backoff: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl Default for BindRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl BindRetry {
    /// Delay before retry number `attempt` (0-based), including up to 25%
    /// random jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Turns on OS keep-alive probes: the first after `interval` of silence,
/// then one every `interval` until the peer answers or is declared dead.
fn enable_keepalive(
    stream: &TcpStream,
    interval: Duration,
) -> std::io::Result<()> {
    let params = TcpKeepalive::new().with_time(interval);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        windows,
    ))]
    let params = params.with_interval(interval);
    SockRef::from(stream).set_tcp_keepalive(&params)
}

/// A [`Transport`] that accepts plain TCP streams.
pub struct TcpTransport {
    listener: TcpListener,
    keepalive: Option<Duration>,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).await.map_err(|source| {
                TransportError::Bind {
                    addr: addr.to_string(),
                    source,
                }
            })?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            keepalive: None,
        })
    }

    /// Enables TCP keep-alive on every socket accepted from now on, probing
    /// after `interval` of silence. `None` leaves the OS default (off).
    pub fn set_keepalive(&mut self, interval: Option<Duration>) {
        self.keepalive = interval;
    }

    /// Binds like [`bind`](Self::bind), retrying with backoff while the
    /// address is in use. Any other bind error is returned immediately.
    pub async fn bind_with_retry(
        addr: &str,
        retry: &BindRetry,
    ) -> Result<Self, TransportError> {
        let mut attempt = 0;
        loop {
            match Self::bind(addr).await {
                Ok(transport) => return Ok(transport),
                Err(e) if e.is_addr_in_use() && attempt < retry.attempts => {
                    let delay = retry.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        addr,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "address in use, retrying bind"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }
        if let Some(interval) = self.keepalive {
            if let Err(e) = enable_keepalive(&stream, interval) {
                tracing::debug!(%peer, error = %e, "set_tcp_keepalive failed");
            }
        }

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %peer, "accepted TCP connection");

        let (reader, writer) = stream.into_split();
        Ok(TcpConnection {
            id,
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A single TCP connection.
///
/// The read and write halves are locked independently so a read loop and
/// a writer task can share one connection through an `Arc`.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self
            .reader
            .lock()
            .await
            .read(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_retry_delay_doubles_and_caps() {
        let retry = BindRetry {
            attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        let first = retry.delay(0);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        let second = retry.delay(1);
        assert!(second >= Duration::from_millis(200));
        assert!(second <= Duration::from_millis(250));

        let capped = retry.delay(8);
        assert!(capped >= Duration::from_millis(500));
        assert!(capped <= Duration::from_millis(625));
    }

    async fn accept_one(
        transport: &mut TcpTransport,
    ) -> (TcpConnection, TcpStream) {
        let addr = transport.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let conn = transport.accept().await.expect("accept");
        (conn, client)
    }

    #[tokio::test]
    async fn test_accept_enables_keepalive_when_configured() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        transport.set_keepalive(Some(Duration::from_secs(30)));

        let (conn, _client) = accept_one(&mut transport).await;

        let reader = conn.reader.lock().await;
        let stream: &TcpStream = (*reader).as_ref();
        let socket = SockRef::from(stream);
        assert!(socket.keepalive().unwrap());
        #[cfg(target_os = "linux")]
        {
            assert_eq!(socket.keepalive_time().unwrap(), Duration::from_secs(30));
            assert_eq!(
                socket.keepalive_interval().unwrap(),
                Duration::from_secs(30)
            );
        }
    }

    #[tokio::test]
    async fn test_accept_leaves_keepalive_off_by_default() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();

        let (conn, _client) = accept_one(&mut transport).await;

        let reader = conn.reader.lock().await;
        let stream: &TcpStream = (*reader).as_ref();
        assert!(!SockRef::from(stream).keepalive().unwrap());
    }

    #[test]
    fn test_bind_retry_zero_backoff_has_no_jitter() {
        let retry = BindRetry {
            attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        };
        assert_eq!(retry.delay(3), Duration::ZERO);
    }
}
