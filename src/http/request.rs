//! Request inspection and header rewriting.
//!
//! # Responsibilities
//! - Recognise a request head in buffered client bytes
//! - Extract the target host from the first `Host: ` line
//! - Strip connection-control headers and force `Connection: close`
//!
//! # Design Decisions
//! - Works on raw bytes; no HTTP/1.1 validation beyond the method token
//! - Bytes after the head (body) are forwarded verbatim
//! - Matching is case-sensitive, so `host:` is not a host line

use std::fmt;

use thiserror::Error;

/// Methods that mark the start of a request head.
pub const METHODS: &[&str] = &[
    "GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS", "PATCH", "TRACE",
];

const HOST_PREFIX: &[u8] = b"Host: ";
const CONNECTION_CLOSE: &[u8] = b"Connection: close";
const STRIPPED_HEADERS: &[&[u8]] = &[b"Connection:", b"Keep-Alive:", b"Proxy-Connection:"];

/// Why a buffer could not be turned into a [`ParsedRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    #[error("no request bytes available")]
    Empty,

    #[error("payload does not start with an HTTP method")]
    NotHttp,

    #[error("request head is not terminated by a blank line")]
    IncompleteHead,

    #[error("request has no Host header and no previous host to fall back on")]
    MissingHost,
}

/// The request carried no `Host` header and was routed to the previous host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRequestWarning {
    pub fallback_host: String,
}

impl fmt::Display for MalformedRequestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing Host header, falling back to {}", self.fallback_host)
    }
}

/// Minimal view of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// Host token as written in the request, possibly with a port.
    pub target_host: String,
    /// Request bytes with connection-control headers rewritten.
    pub rewritten: Vec<u8>,
    pub warning: Option<MalformedRequestWarning>,
}

impl ParsedRequest {
    /// The name to resolve: `target_host` without any `:port` suffix.
    pub fn hostname(&self) -> &str {
        strip_port(&self.target_host)
    }
}

/// Classification of bytes buffered from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// A complete head ending at this offset (terminator included).
    Head(usize),
    /// Could still become a request head; read more.
    Partial,
    /// Not a request; forward unchanged.
    Raw,
}

/// Classify buffered client bytes.
pub fn scan(buf: &[u8]) -> Scan {
    match method_prefix(buf) {
        Prefix::No => Scan::Raw,
        Prefix::Maybe => Scan::Partial,
        Prefix::Yes => match head_end(buf) {
            Some(end) => Scan::Head(end),
            None => Scan::Partial,
        },
    }
}

/// Parse one request, routing to `fallback_host` when it names no host.
pub fn inspect(raw: &[u8], fallback_host: Option<&str>) -> Result<ParsedRequest, InspectError> {
    if raw.is_empty() {
        return Err(InspectError::Empty);
    }
    let method = match method_prefix(raw) {
        Prefix::Yes => first_token(raw),
        _ => return Err(InspectError::NotHttp),
    };
    let end = head_end(raw).ok_or(InspectError::IncompleteHead)?;
    let (head, body) = raw.split_at(end);

    let (target_host, warning) = match find_host(head) {
        Some(host) => (host, None),
        None => {
            let fallback = fallback_host.ok_or(InspectError::MissingHost)?;
            let warning = MalformedRequestWarning {
                fallback_host: fallback.to_string(),
            };
            tracing::warn!(method = %method, "{}", warning);
            (fallback.to_string(), Some(warning))
        }
    };

    let mut rewritten = rewrite_head(head);
    rewritten.extend_from_slice(body);

    Ok(ParsedRequest {
        method,
        target_host,
        rewritten,
        warning,
    })
}

/// Drop connection-control headers and insert `Connection: close` before
/// the blank line. `head` must end with its blank line.
pub fn rewrite_head(head: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len() + CONNECTION_CLOSE.len() + 4);
    let mut lines = lines(head);

    // Request line is never a header.
    if let Some(request_line) = lines.next() {
        out.extend_from_slice(request_line);
    }

    for line in lines {
        if is_blank(line) {
            // Reuse the head's own terminator style for both lines.
            out.extend_from_slice(CONNECTION_CLOSE);
            out.extend_from_slice(line);
            out.extend_from_slice(line);
            break;
        }
        if !STRIPPED_HEADERS.iter().any(|name| contains(line, name)) {
            out.extend_from_slice(line);
        }
    }

    out
}

enum Prefix {
    Yes,
    Maybe,
    No,
}

fn method_prefix(buf: &[u8]) -> Prefix {
    let mut maybe = false;
    for method in METHODS {
        let method = method.as_bytes();
        let token_len = method.len() + 1;
        if buf.len() >= token_len {
            if buf.starts_with(method) && buf[method.len()] == b' ' {
                return Prefix::Yes;
            }
        } else if method.starts_with(buf) {
            maybe = true;
        }
    }
    if maybe {
        Prefix::Maybe
    } else {
        Prefix::No
    }
}

fn first_token(buf: &[u8]) -> String {
    let token = buf.split(|&b| b == b' ').next().unwrap_or_default();
    String::from_utf8_lossy(token).into_owned()
}

/// Offset just past the blank line that ends the head.
fn head_end(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    for line in lines(buf) {
        offset += line.len();
        if offset > line.len() && is_blank(line) {
            return Some(offset);
        }
        if !line.ends_with(b"\n") {
            return None;
        }
    }
    None
}

/// Split on `\n`, keeping each terminator; a trailing fragment is yielded last.
fn lines(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split_inclusive(|&b| b == b'\n')
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

fn find_host(head: &[u8]) -> Option<String> {
    let line = lines(head).skip(1).find(|line| line.starts_with(HOST_PREFIX))?;
    let line = String::from_utf8_lossy(line);
    let host = line.split(' ').nth(1)?.trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
