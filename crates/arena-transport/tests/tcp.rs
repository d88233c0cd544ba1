//! Integration tests for the TCP transport.
//!
//! These spin up a real listener on a random port and a real client, so
//! framing is exercised over an actual socket.

use arena_transport::{Connection, TcpConnection, TcpTransport, Transport};

async fn bind() -> (TcpTransport, String) {
    let transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("local addr").to_string();
    (transport, addr)
}

#[tokio::test]
async fn test_tcp_accept_and_send_receive() {
    let (mut transport, addr) = bind().await;

    let server_handle =
        tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpConnection::connect(&addr).await.expect("should connect");
    let server_conn = server_handle.await.expect("task should complete");

    // Server sends, client receives.
    server_conn.send(b"hello from server").await.unwrap();
    let msg = client.recv().await.unwrap().expect("should have data");
    assert_eq!(msg, b"hello from server");

    // Client sends, server receives.
    client.send(b"hello from client").await.unwrap();
    let msg = server_conn.recv().await.unwrap().expect("should have data");
    assert_eq!(msg, b"hello from client");
}

#[tokio::test]
async fn test_both_sides_agree_on_connection_id() {
    let (mut transport, addr) = bind().await;

    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(&addr).await.unwrap();
    let server_conn = server_handle.await.unwrap();

    assert_eq!(client.id(), server_conn.id());
    assert_eq!(server_conn.id().to_string().len(), 6);
}

#[tokio::test]
async fn test_id_filter_forces_regeneration() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let (transport, addr) = bind().await;
    // Report the first candidate as taken, accept the next one.
    let first_seen = AtomicBool::new(false);
    let mut transport =
        transport.with_id_filter(move |_| !first_seen.swap(true, Ordering::SeqCst));

    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(&addr).await.unwrap();
    let server_conn = server_handle.await.unwrap();

    // The client derives attempt 0; the server had to move on to attempt 1.
    assert_ne!(server_conn.id(), client.id());
    assert_eq!(server_conn.id().to_string().len(), 6);
}

#[tokio::test]
async fn test_recv_returns_none_on_peer_close() {
    let (mut transport, addr) = bind().await;

    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(&addr).await.unwrap();
    let server_conn = server_handle.await.unwrap();

    client.close().await.expect("close should succeed");

    let result = server_conn.recv().await.expect("recv should not error");
    assert!(result.is_none(), "should return None on client close");
}

#[tokio::test]
async fn test_large_frame_over_socket() {
    let (mut transport, addr) = bind().await;

    let server_handle = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(&addr).await.unwrap();
    let server_conn = server_handle.await.unwrap();

    let payload: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 253) as u8).collect();
    let expected = payload.clone();
    let sender = tokio::spawn(async move {
        client.send(&payload).await.unwrap();
        client
    });

    let received = server_conn.recv().await.unwrap().unwrap();
    let _client = sender.await.unwrap();
    assert_eq!(received, expected);
}
