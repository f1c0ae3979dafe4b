//! Upload and download data movers.
//!
//! ```text
//! upload:   rewritten request + continuation chunks ──▶ upstream
//! download: upstream ──▶ client, in arrival order, until EOF
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::observability::metrics;
use crate::proxy::client::ClientSink;
use crate::proxy::session::SessionError;
use crate::resilience::bounded;

/// Byte flow within a Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → upstream.
    Upload,
    /// Upstream → client.
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which socket an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Upstream,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Client => f.write_str("client"),
            Leg::Upstream => f.write_str("upstream"),
        }
    }
}

fn relay_error(direction: Direction, leg: Leg) -> impl FnOnce(io::Error) -> SessionError {
    move |source| SessionError::Relay {
        direction,
        leg,
        source,
    }
}

/// Write the request and then every continuation chunk until the client
/// driver drops the sender.
pub(crate) async fn upload(
    upstream: &mut OwnedWriteHalf,
    request: &[u8],
    continuation: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<u64, SessionError> {
    upstream
        .write_all(request)
        .await
        .map_err(relay_error(Direction::Upload, Leg::Upstream))?;
    let mut total = request.len() as u64;

    while let Some(chunk) = continuation.recv().await {
        upstream
            .write_all(&chunk)
            .await
            .map_err(relay_error(Direction::Upload, Leg::Upstream))?;
        total += chunk.len() as u64;
    }

    metrics::record_relay_bytes(Direction::Upload.as_str(), total);
    Ok(total)
}

/// Result of the download task.
#[derive(Debug)]
pub(crate) struct DownloadOutcome {
    pub result: Result<u64, SessionError>,
    /// The predecessor's completion signal, returned un-awaited when the
    /// download was stopped before its turn came.
    pub turn: Option<oneshot::Receiver<()>>,
}

/// Settings for [`download`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct DownloadLimits {
    pub buffer_bytes: usize,
    pub idle: Duration,
}

/// Stream `upstream` into `client` until upstream EOF, failure or `stop`.
///
/// Nothing is written to the client before `turn` resolves, so responses of
/// one connection never interleave.
pub(crate) async fn download(
    mut upstream: OwnedReadHalf,
    client: ClientSink,
    mut turn: Option<oneshot::Receiver<()>>,
    mut stop: oneshot::Receiver<()>,
    limits: DownloadLimits,
) -> DownloadOutcome {
    if let Some(wait) = turn.as_mut() {
        tokio::select! {
            biased;
            _ = &mut stop => return DownloadOutcome { result: Ok(0), turn },
            _ = wait => {}
        }
    }

    let mut buf = vec![0u8; limits.buffer_bytes];
    let mut total = 0u64;

    let result = loop {
        let read = tokio::select! {
            biased;
            _ = &mut stop => break Ok(total),
            read = bounded("upstream read", limits.idle, upstream.read(&mut buf)) => read,
        };

        let n = match read {
            Ok(Ok(0)) => break Ok(total),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break Err(relay_error(Direction::Download, Leg::Upstream)(e)),
            Err(timed_out) => break Err(SessionError::Timeout(timed_out)),
        };

        if let Err(e) = client.write_all(&buf[..n]).await {
            break Err(relay_error(Direction::Download, Leg::Client)(e));
        }
        total += n as u64;
    };

    metrics::record_relay_bytes(Direction::Download.as_str(), total);
    DownloadOutcome { result, turn: None }
}
