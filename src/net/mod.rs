//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → connection.rs (ID, live-connection tracking)
//!     → Hand off to the proxy client driver
//! ```
//!
//! # Design Decisions
//! - Accept loop never waits on request processing
//! - Each connection tracked for logging and metrics

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
