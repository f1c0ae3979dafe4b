//! HTTP request inspection.
//!
//! # Data Flow
//! ```text
//! Bytes buffered from a client
//!     → request::scan (head complete? raw continuation?)
//!     → request::inspect (method, target host, rewritten bytes)
//!     → Session (routing by target host)
//! ```

pub mod request;

pub use request::{
    inspect, rewrite_head, scan, InspectError, MalformedRequestWarning, ParsedRequest, Scan,
};
