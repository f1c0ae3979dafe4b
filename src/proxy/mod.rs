//! Connection pairing and relay engine.
//!
//! # Data Flow
//! ```text
//! server.rs   accept → one client driver per connection
//! client.rs   read request head → inspect → spawn Session
//! session.rs  Resolving → Connecting → Relaying → Closed
//! relay.rs    upload (session task) ∥ download (own task)
//! ```
//!
//! # Design Decisions
//! - The resolver cache is the only state shared across connections
//! - Every Session owns its upstream socket; teardown closes it exactly once
//! - Per-session failures never reach other Sessions or the accept loop

pub mod client;
pub mod relay;
pub mod server;
pub mod session;

use crate::config::ProxyConfig;
use crate::dns::ResolverCache;

pub use client::{ClientError, ClientSink};
pub use relay::{Direction, Leg};
pub use server::ProxyServer;
pub use session::{RelayStats, Session, SessionError, SessionId, SessionState};

/// State every Session of a server reads.
#[derive(Debug)]
pub struct SessionContext {
    pub config: ProxyConfig,
    pub cache: ResolverCache,
}
