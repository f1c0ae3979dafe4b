//! Per-client-connection driver.
//!
//! # Responsibilities
//! - Read requests from one accepted connection in a loop
//! - Spawn a Session for every parsed request head
//! - Forward non-HTTP continuation bytes (request bodies) to the latest Session
//! - Share the client write side between that connection's Sessions
//!
//! # Design Decisions
//! - Responses are written to the client in request order (turn handoff)
//! - The client write side closes once no Session of the connection is in flight

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::http::{inspect, scan, InspectError, Scan};
use crate::net::{ConnectionGuard, ConnectionId};
use crate::proxy::session::Session;
use crate::proxy::SessionContext;
use crate::resilience::bounded;

/// Continuation chunks queued for a Session's upload before the reader waits.
const UPLOAD_QUEUE: usize = 16;

/// Reasons a client connection stops being read.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
}

/// Write side of a client connection, shared by the Sessions it spawned.
///
/// Closing is idempotent; writes after close fail with `NotConnected`.
#[derive(Debug, Clone)]
pub struct ClientSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    writer: Mutex<Option<OwnedWriteHalf>>,
    in_flight: AtomicUsize,
    closed: watch::Sender<bool>,
}

impl ClientSink {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(SinkInner {
                writer: Mutex::new(Some(writer)),
                in_flight: AtomicUsize::new(0),
                closed,
            }),
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.write_all(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "client connection already closed",
            )),
        }
    }

    /// Shut down the write side. Only the first call does anything.
    pub async fn close(&self) {
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolve once the sink has been closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Number of Sessions still holding this sink.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self) {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one Session's hold; the last one out closes the connection.
    pub(crate) async fn release(&self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.close().await;
        }
    }
}

/// Read requests from `stream` until EOF, error, timeout or close.
pub async fn serve_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<SessionContext>,
    guard: ConnectionGuard,
) {
    let connection_id = guard.id();
    let (mut reader, writer) = stream.into_split();
    let mut driver = ClientDriver {
        connection_id,
        ctx,
        sink: ClientSink::new(writer),
        pending: Vec::new(),
        last_host: None,
        upload: None,
        previous_turn: None,
    };

    tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, "Client connected");

    let idle = driver.ctx.config.timeouts.idle();
    let mut buf = vec![0u8; driver.ctx.config.client.read_buffer_bytes];
    let sink = driver.sink.clone();

    loop {
        let read = tokio::select! {
            biased;
            _ = sink.closed() => break,
            read = bounded("client read", idle, reader.read(&mut buf)) => read,
        };

        let n = match read {
            Ok(Ok(0)) => {
                tracing::debug!(connection_id = %connection_id, "Client closed its side");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Client read failed");
                break;
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Client idle");
                break;
            }
        };

        driver.pending.extend_from_slice(&buf[..n]);
        if let Err(e) = driver.dispatch().await {
            tracing::warn!(connection_id = %connection_id, peer_addr = %peer_addr, error = %e, "Dropping client request");
            break;
        }
    }

    // Ends the upload of the latest Session.
    driver.upload = None;
    if sink.in_flight() == 0 {
        sink.close().await;
    }
    tracing::debug!(connection_id = %connection_id, "Client reader finished");
}

struct ClientDriver {
    connection_id: ConnectionId,
    ctx: Arc<SessionContext>,
    sink: ClientSink,
    pending: Vec<u8>,
    /// Host of the previous request, used when a request names none.
    last_host: Option<String>,
    upload: Option<mpsc::Sender<Vec<u8>>>,
    /// Completion signal of the most recently spawned Session.
    previous_turn: Option<oneshot::Receiver<()>>,
}

impl ClientDriver {
    /// Consume `pending`: one Session per complete head, everything else
    /// forwarded to the latest Session's upload.
    async fn dispatch(&mut self) -> Result<(), ClientError> {
        while !self.pending.is_empty() {
            match scan(&self.pending) {
                Scan::Head(end) => {
                    let parsed = inspect(&self.pending[..end], self.last_host.as_deref())?;
                    self.pending.drain(..end);
                    self.spawn_session(parsed);
                }
                // A body segment may look like the start of a method; with an
                // upload open it is flushed rather than held back.
                Scan::Partial if self.upload.is_some() => {
                    let chunk = std::mem::take(&mut self.pending);
                    self.forward_raw(chunk).await?;
                }
                Scan::Partial => {
                    let limit = self.ctx.config.client.max_head_bytes;
                    if self.pending.len() > limit {
                        return Err(ClientError::HeadTooLarge { limit });
                    }
                    return Ok(());
                }
                Scan::Raw => {
                    let chunk = std::mem::take(&mut self.pending);
                    self.forward_raw(chunk).await?;
                }
            }
        }
        Ok(())
    }

    async fn forward_raw(&mut self, chunk: Vec<u8>) -> Result<(), ClientError> {
        let Some(upload) = self.upload.as_ref() else {
            return Err(InspectError::NotHttp.into());
        };
        if let Err(mpsc::error::SendError(chunk)) = upload.send(chunk).await {
            self.upload = None;
            if scan(&chunk) == Scan::Raw {
                tracing::debug!(connection_id = %self.connection_id, "Session already finished; discarding continuation bytes");
            } else {
                // Possibly the start of the next request.
                self.pending = chunk;
            }
        }
        Ok(())
    }

    fn spawn_session(&mut self, parsed: crate::http::ParsedRequest) {
        let (upload_tx, upload_rx) = mpsc::channel(UPLOAD_QUEUE);
        let (done_tx, done_rx) = oneshot::channel();
        let wait_turn = self.previous_turn.replace(done_rx);

        self.last_host = Some(parsed.target_host.clone());
        // Replacing the sender ends the previous Session's upload.
        self.upload = Some(upload_tx);
        self.sink.acquire();

        let session = Session::new(
            self.connection_id,
            parsed,
            self.sink.clone(),
            upload_rx,
            wait_turn,
            done_tx,
            Arc::clone(&self.ctx),
        );
        // `run` logs and records its own outcome.
        tokio::spawn(async move { session.run().await.ok() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn sink_closes_once_and_rejects_later_writes() {
        let (mut peer, proxy_side) = socket_pair().await;
        let (_read, write) = proxy_side.into_split();
        let sink = ClientSink::new(write);

        sink.write_all(b"hello").await.unwrap();
        sink.close().await;
        sink.close().await;
        assert!(sink.is_closed());

        let err = sink.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn last_release_closes_sink() {
        let (_peer, proxy_side) = socket_pair().await;
        let (_read, write) = proxy_side.into_split();
        let sink = ClientSink::new(write);

        sink.acquire();
        sink.acquire();
        sink.release().await;
        assert!(!sink.is_closed());
        assert_eq!(sink.in_flight(), 1);

        sink.release().await;
        assert!(sink.is_closed());
        sink.closed().await;
    }
}
