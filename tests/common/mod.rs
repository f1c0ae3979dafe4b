//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forward_proxy::dns::{Lookup, LookupFuture, ResolverCache};
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::net::{Listener, ListenerError};
use forward_proxy::{ProxyConfig, ProxyServer};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Resolves every name to loopback except `*.invalid`, recording each query.
#[derive(Default)]
pub struct StaticLookup {
    queries: Mutex<Vec<String>>,
}

impl StaticLookup {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl Lookup for StaticLookup {
    fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a> {
        self.queries.lock().unwrap().push(hostname.to_string());
        Box::pin(async move {
            if hostname.ends_with(".invalid") {
                Err(io::Error::new(io::ErrorKind::NotFound, "nxdomain"))
            } else {
                Ok(IpAddr::from([127, 0, 0, 1]))
            }
        })
    }
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub lookup: Arc<StaticLookup>,
    pub cache: ResolverCache,
    pub task: JoinHandle<Result<(), ListenerError>>,
}

/// Start a proxy on an ephemeral loopback port whose upstream leg targets
/// `upstream_port` on whatever the static lookup returns.
pub async fn start_proxy(upstream_port: u16) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_ip = "127.0.0.1".into();
    config.listener.port = 0;
    config.upstream.port = upstream_port;
    config.timeouts.connect_secs = 2;
    config.timeouts.idle_secs = 5;

    let lookup = Arc::new(StaticLookup::default());
    let cache = ResolverCache::with_lookup(config.resolver.ttl(), lookup.clone());
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = ProxyServer::with_cache(config, cache.clone());
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        shutdown,
        lookup,
        cache,
        task,
    }
}

/// Start a mock origin that hands every accepted socket to `handler`.
pub async fn start_upstream<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(handler(socket));
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Read until the end of the request head; returns everything read so far.
pub async fn read_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "stream closed before request head completed");
        received.extend_from_slice(&buf[..n]);
    }
    received
}

/// Read until EOF, failing the test if it takes too long.
pub async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut received))
        .await
        .expect("timed out waiting for EOF")
        .expect("read failed");
    received
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
