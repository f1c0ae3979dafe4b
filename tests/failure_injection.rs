//! Failure injection tests for the forward proxy.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::{closed_port, contains, payload, read_head, read_to_eof, start_proxy, start_upstream};

/// Read whatever arrives until EOF or reset, whichever comes first.
async fn drain(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut buf))
            .await
            .expect("timed out waiting for the proxy to close");
        match read {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
}

#[tokio::test]
async fn upstream_reset_does_not_affect_other_sessions() {
    let healthy_body = payload(3000);
    let response = healthy_body.clone();

    let upstream = start_upstream(move |mut socket| {
        let response = response.clone();
        async move {
            let head = read_head(&mut socket).await;
            if contains(&head, b"Host: broken.test") {
                socket.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                // Abortive close: the proxy sees a reset mid-response.
                #[allow(deprecated)]
                socket.set_linger(Some(Duration::ZERO)).unwrap();
                drop(socket);
            } else {
                for chunk in response.chunks(1000) {
                    socket.write_all(chunk).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    })
    .await;

    let proxy = start_proxy(upstream.port()).await;

    let mut healthy = TcpStream::connect(proxy.addr).await.unwrap();
    let mut broken = TcpStream::connect(proxy.addr).await.unwrap();
    healthy
        .write_all(b"GET /big HTTP/1.1\r\nHost: healthy.test\r\n\r\n")
        .await
        .unwrap();
    broken
        .write_all(b"GET /boom HTTP/1.1\r\nHost: broken.test\r\n\r\n")
        .await
        .unwrap();

    let (healthy_received, broken_received) =
        tokio::join!(read_to_eof(&mut healthy), drain(&mut broken));

    assert_eq!(healthy_received, healthy_body);
    assert!(broken_received.len() <= b"HTTP/1.1 200 OK\r\n".len());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn unresolvable_host_closes_client_without_response() {
    let proxy = start_proxy(closed_port().await).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: nowhere.invalid\r\n\r\n")
        .await
        .unwrap();

    assert!(read_to_eof(&mut client).await.is_empty());
    assert!(proxy.cache.is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn refused_upstream_closes_client_without_response() {
    let proxy = start_proxy(closed_port().await).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: refused.test\r\n\r\n")
        .await
        .unwrap();

    assert!(read_to_eof(&mut client).await.is_empty());
    // Resolution succeeded and stays cached.
    assert_eq!(proxy.cache.len(), 1);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn non_http_first_payload_drops_connection() {
    let proxy = start_proxy(closed_port().await).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(b"\x16\x03\x01\x00\xa5\x01\x00").await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    assert!(proxy.lookup.queries().is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn first_request_without_host_drops_connection() {
    let proxy = start_proxy(closed_port().await).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    assert!(proxy.lookup.queries().is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let proxy = start_proxy(closed_port().await).await;

    proxy.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), proxy.task)
        .await
        .expect("accept loop did not stop")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(proxy.addr).await.is_err());
}
