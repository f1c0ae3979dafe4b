//! Transparent HTTP forward proxy library.

pub mod config;
pub mod dns;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use dns::ResolverCache;
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
