//! Name lookup backends.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;

/// Boxed future returned by [`Lookup::lookup`].
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = io::Result<IpAddr>> + Send + 'a>>;

/// Turns a hostname into a single address.
///
/// The cache calls this on every miss; implementations do no caching of
/// their own.
pub trait Lookup: Send + Sync + 'static {
    fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a>;
}

/// Delegates to the platform resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

impl Lookup for SystemLookup {
    fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a> {
        Box::pin(async move {
            let mut addrs = tokio::net::lookup_host((hostname, 0)).await?;
            addrs.next().map(|addr| addr.ip()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", hostname),
                )
            })
        })
    }
}
