//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Session step (resolve, connect, read):
//!     → timeouts.rs (enforce deadline)
//!     → On expiry: session transitions to Closed
//! ```
//!
//! # Design Decisions
//! - Every external wait has a deadline
//! - No retries: a failed session is torn down, never replayed

pub mod timeouts;

pub use timeouts::{bounded, TimedOut};
