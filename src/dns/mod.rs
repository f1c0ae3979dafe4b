//! Address resolution subsystem.
//!
//! # Data Flow
//! ```text
//! Session (target hostname)
//!     → cache.rs (live entry? return it)
//!     → lookup.rs (platform resolver on miss or expiry)
//!     → cache.rs (insert with expires_at = now + ttl)
//! ```
//!
//! # Design Decisions
//! - One cache object per server, handed to sessions by clone
//! - Lazy expiry on read plus one periodic sweep task (no per-entry timers)
//! - No single-flight: concurrent misses may each look up, last write wins

pub mod cache;
pub mod lookup;

pub use cache::{ResolutionError, ResolvedHost, ResolverCache};
pub use lookup::{Lookup, LookupFuture, SystemLookup};
