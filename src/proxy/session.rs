//! Session state machine.
//!
//! # States
//! ```text
//! Resolving → Connecting → Relaying → Closed
//!     │            │           │
//!     └────────────┴───────────┴──▶ Closed (on any failure, no retries)
//! ```
//!
//! A Session owns its upstream connection and one hold on the client
//! connection's write side. Teardown closes the upstream exactly once and
//! releases the hold; the last hold out closes the client.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::dns::ResolutionError;
use crate::http::ParsedRequest;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::proxy::client::ClientSink;
use crate::proxy::relay::{self, Direction, DownloadLimits, DownloadOutcome, Leg};
use crate::proxy::SessionContext;
use crate::resilience::{bounded, TimedOut};

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Connecting,
    Relaying,
    Closed,
}

/// Why a Session ended early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("failed to connect to upstream {addr}")]
    UpstreamConnect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Timeout(#[from] TimedOut),

    #[error("{direction} relay failed on the {leg} side")]
    Relay {
        direction: Direction,
        leg: Leg,
        #[source]
        source: io::Error,
    },

    #[error("download task aborted")]
    DownloadAborted(#[source] tokio::task::JoinError),
}

impl SessionError {
    /// Label used for the `proxy_sessions_total` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            SessionError::Resolution(_) => "resolution_error",
            SessionError::UpstreamConnect { .. } => "connect_error",
            SessionError::Timeout(_) => "timeout",
            SessionError::Relay { .. } | SessionError::DownloadAborted(_) => "relay_error",
        }
    }

    /// The client socket is unusable after this error.
    fn client_broken(&self) -> bool {
        matches!(self, SessionError::Relay { leg: Leg::Client, .. })
    }
}

/// Byte counts of a finished Session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub uploaded: u64,
    pub downloaded: u64,
}

/// One client request paired with one upstream connection.
pub struct Session {
    id: SessionId,
    connection_id: ConnectionId,
    request: ParsedRequest,
    client: ClientSink,
    continuation: mpsc::Receiver<Vec<u8>>,
    /// Resolves once the previous Session of this connection is done with the client.
    turn: Option<oneshot::Receiver<()>>,
    /// Dropped at teardown to hand the client to the next Session.
    _done: oneshot::Sender<()>,
    ctx: Arc<SessionContext>,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(
        connection_id: ConnectionId,
        request: ParsedRequest,
        client: ClientSink,
        continuation: mpsc::Receiver<Vec<u8>>,
        turn: Option<oneshot::Receiver<()>>,
        done: oneshot::Sender<()>,
        ctx: Arc<SessionContext>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            connection_id,
            request,
            client,
            continuation,
            turn,
            _done: done,
            ctx,
            state: SessionState::Resolving,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the Session to `Closed`, tearing down both legs on every path.
    pub async fn run(mut self) -> Result<RelayStats, SessionError> {
        let started = Instant::now();
        tracing::debug!(
            session_id = %self.id,
            connection_id = %self.connection_id,
            method = %self.request.method,
            host = %self.request.target_host,
            "Session started"
        );

        let result = self.drive().await;
        self.transition(SessionState::Closed);

        // Keep response order even if this Session never wrote anything.
        if let Some(turn) = self.turn.take() {
            let _ = turn.await;
        }
        if matches!(&result, Err(e) if e.client_broken()) {
            self.client.close().await;
        }
        self.client.release().await;

        match &result {
            Ok(stats) => {
                metrics::record_session("completed");
                tracing::info!(
                    session_id = %self.id,
                    connection_id = %self.connection_id,
                    host = %self.request.target_host,
                    uploaded = stats.uploaded,
                    downloaded = stats.downloaded,
                    elapsed = ?started.elapsed(),
                    "Session closed"
                );
            }
            Err(e) => {
                metrics::record_session(e.outcome());
                tracing::warn!(
                    session_id = %self.id,
                    connection_id = %self.connection_id,
                    host = %self.request.target_host,
                    error = %e,
                    source = ?std::error::Error::source(e),
                    "Session failed"
                );
            }
        }

        result
    }

    async fn drive(&mut self) -> Result<RelayStats, SessionError> {
        let timeouts = self.ctx.config.timeouts.clone();

        let address = bounded(
            "resolve",
            timeouts.connect(),
            self.ctx.cache.resolve(self.request.hostname()),
        )
        .await??;

        self.transition(SessionState::Connecting);
        let addr = SocketAddr::new(address, self.ctx.config.upstream.port);
        let upstream = bounded("connect", timeouts.connect(), TcpStream::connect(addr))
            .await?
            .map_err(|source| SessionError::UpstreamConnect { addr, source })?;
        tracing::debug!(session_id = %self.id, upstream = %addr, "Upstream connected");

        self.transition(SessionState::Relaying);
        self.relay(upstream).await
    }

    async fn relay(&mut self, upstream: TcpStream) -> Result<RelayStats, SessionError> {
        let (upstream_read, mut upstream_write) = upstream.into_split();
        let (stop_tx, stop_rx) = oneshot::channel();
        let limits = DownloadLimits {
            buffer_bytes: self.ctx.config.upstream.read_buffer_bytes,
            idle: self.ctx.config.timeouts.idle(),
        };

        let mut download = tokio::spawn(relay::download(
            upstream_read,
            self.client.clone(),
            self.turn.take(),
            stop_rx,
            limits,
        ));

        let (joined, upload_result) = {
            let upload = relay::upload(
                &mut upstream_write,
                &self.request.rewritten,
                &mut self.continuation,
            );
            tokio::pin!(upload);
            let mut uploaded = None;

            loop {
                tokio::select! {
                    joined = &mut download => break (joined, uploaded.unwrap_or(Ok(0))),
                    result = &mut upload, if uploaded.is_none() => {
                        if result.is_err() {
                            let _ = stop_tx.send(());
                            break ((&mut download).await, result);
                        }
                        uploaded = Some(result);
                    }
                }
            }
        };

        // Upload is finished or abandoned; close the upstream leg.
        let _ = upstream_write.shutdown().await;
        drop(upstream_write);

        let DownloadOutcome { result, turn } = joined.map_err(SessionError::DownloadAborted)?;
        self.turn = turn;

        let uploaded = upload_result?;
        let downloaded = result?;
        Ok(RelayStats {
            uploaded,
            downloaded,
        })
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            session_id = %self.id,
            from = ?self.state,
            to = ?next,
            "Session state change"
        );
        self.state = next;
    }
}
