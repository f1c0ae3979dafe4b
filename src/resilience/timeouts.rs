//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound name resolution, upstream connect and every socket read
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - A timed-out session is closed like any other failure (no response synthesized)

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// An operation that exceeded its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} timed out after {limit:?}")]
pub struct TimedOut {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Run `fut` to completion or fail once `limit` elapses.
pub async fn bounded<F>(operation: &'static str, limit: Duration, fut: F) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimedOut { operation, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_within_limit() {
        let value = bounded("noop", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_operation_on_expiry() {
        let err = bounded("connect", Duration::from_millis(50), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(err.operation, "connect");
        assert_eq!(err.to_string(), "connect timed out after 50ms");
    }
}
