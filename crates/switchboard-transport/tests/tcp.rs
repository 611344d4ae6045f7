//! Integration tests for the TCP transport.
//!
//! These spin up a real listener on a random port and talk to it with a
//! plain Tokio `TcpStream`, so bytes actually cross the loopback device.

use std::time::Duration;

use switchboard_transport::{
    BindRetry, Connection, TcpTransport, Transport, TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn bind_random() -> (TcpTransport, String) {
    let transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("local addr").to_string();
    (transport, addr)
}

#[tokio::test]
async fn test_tcp_accept_and_send_receive() {
    let (mut transport, addr) = bind_random().await;

    let server = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let mut client = TcpStream::connect(&addr).await.expect("connect");
    let conn = server.await.expect("task should complete");

    assert!(conn.id().into_inner() > 0);
    assert_eq!(conn.peer_addr(), client.local_addr().unwrap());

    // Client → server.
    client.write_all(b"hello relay").await.unwrap();
    let mut received = Vec::new();
    while received.len() < 11 {
        let chunk = conn.recv().await.expect("recv").expect("open");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"hello relay");

    // Server → client.
    conn.send(b"hi back\n").await.expect("send");
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hi back\n");
}

#[tokio::test]
async fn test_tcp_recv_returns_none_on_peer_close() {
    let (mut transport, addr) = bind_random().await;

    let server = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let client = TcpStream::connect(&addr).await.expect("connect");
    let conn = server.await.unwrap();

    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("recv should not hang");
    assert!(matches!(result, Ok(None)));
}

#[tokio::test]
async fn test_tcp_close_ends_client_stream() {
    let (mut transport, addr) = bind_random().await;

    let server = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });
    let mut client = TcpStream::connect(&addr).await.expect("connect");
    let conn = server.await.unwrap();

    conn.close().await.expect("close");

    let mut buf = Vec::new();
    let n = tokio::time::timeout(
        Duration::from_secs(2),
        client.read_to_end(&mut buf),
    )
    .await
    .expect("read should finish")
    .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_tcp_connection_ids_are_unique() {
    let (mut transport, addr) = bind_random().await;

    let server = tokio::spawn(async move {
        let a = transport.accept().await.unwrap();
        let b = transport.accept().await.unwrap();
        (a, b)
    });
    let _c1 = TcpStream::connect(&addr).await.unwrap();
    let _c2 = TcpStream::connect(&addr).await.unwrap();
    let (a, b) = server.await.unwrap();

    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn test_bind_with_retry_fails_fast_on_bad_address() {
    let result =
        TcpTransport::bind_with_retry("not-an-address", &BindRetry::default())
            .await;
    assert!(matches!(result, Err(TransportError::Bind { .. })));
}

#[tokio::test]
async fn test_bind_with_retry_gives_up_when_port_stays_taken() {
    let (_held, addr) = bind_random().await;
    let retry = BindRetry {
        attempts: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
    };

    let result = TcpTransport::bind_with_retry(&addr, &retry).await;

    let err = result.err().expect("port is held");
    assert!(err.is_addr_in_use());
}
