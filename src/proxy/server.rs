//! Proxy accept loop.
//!
//! # Responsibilities
//! - Own the resolver cache and hand it to every Session
//! - Accept client connections and spawn one driver per connection
//! - Run the resolver sweeper alongside the accept loop
//! - Stop accepting on shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::dns::ResolverCache;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::proxy::client::serve_client;
use crate::proxy::SessionContext;

/// Pause after a failed accept so persistent errors (e.g. fd exhaustion) don't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The forward proxy server.
pub struct ProxyServer {
    ctx: Arc<SessionContext>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Create a server resolving through the platform resolver.
    pub fn new(config: ProxyConfig) -> Self {
        let cache = ResolverCache::new(config.resolver.ttl());
        Self::with_cache(config, cache)
    }

    /// Create a server around an existing cache.
    pub fn with_cache(config: ProxyConfig, cache: ResolverCache) -> Self {
        Self {
            ctx: Arc::new(SessionContext { config, cache }),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.ctx.config
    }

    pub fn cache(&self) -> &ResolverCache {
        &self.ctx.cache
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Bind `port` on the configured address and accept until shutdown.
    pub async fn serve(
        self,
        port: u16,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let mut listener_config = self.ctx.config.listener.clone();
        listener_config.port = port;
        let listener = Listener::bind(&listener_config).await?;
        self.run(listener, shutdown).await
    }

    /// Accept on an already bound listener until shutdown.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(
            address = %addr,
            upstream_port = self.ctx.config.upstream.port,
            resolver_ttl = ?self.ctx.cache.ttl(),
            "Proxy accepting connections"
        );

        tokio::spawn(
            self.ctx
                .cache
                .clone()
                .run_sweeper(self.ctx.config.resolver.sweep_interval(), shutdown.resubscribe()),
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let guard = self.tracker.track();
                        tokio::spawn(serve_client(stream, peer_addr, Arc::clone(&self.ctx), guard));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Proxy stopped accepting");
                    break;
                }
            }
        }

        Ok(())
    }
}
